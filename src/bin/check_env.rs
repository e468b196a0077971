//! Reports which environment variables are set (never their values), which
//! transport would be selected, and whether the configuration is complete.

use std::process::ExitCode;

use news_digest::config::{env_presence, Settings};
use news_digest::ingest::config::SourceRegistry;
use news_digest::notify::TransportKind;

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    println!("{}", "=".repeat(60));
    println!("news-digest environment check");
    println!("{}", "=".repeat(60));
    for (key, set) in env_presence() {
        println!("{:<30} {}", key, if set { "set" } else { "-" });
    }
    println!();

    let mut ok = true;
    match Settings::from_env() {
        Ok(settings) => {
            let transport = if settings.delivery.oauth.is_some() {
                TransportKind::HttpsApi
            } else {
                TransportKind::Smtp
            };
            println!("schedule:   {}", settings.schedule.describe());
            println!("transport:  {}", transport.label());
            println!("recipients: {}", settings.delivery.recipients.len());
        }
        Err(e) => {
            println!("configuration: INVALID ({e})");
            ok = false;
        }
    }

    match SourceRegistry::load_default() {
        Ok(reg) => println!(
            "sources:    {} configured, {} enabled",
            reg.len(),
            reg.enabled().count()
        ),
        Err(e) => {
            println!("sources: INVALID ({e})");
            ok = false;
        }
    }

    if ok {
        println!("\nconfiguration complete");
        ExitCode::SUCCESS
    } else {
        println!("\nconfiguration incomplete; the scheduler would stay disarmed");
        ExitCode::FAILURE
    }
}
