use webpilot_browser::{Action, ActionOutcome, Browser};
use webpilot_core::{Config, Paths};

use crate::RunCommands;

/// Execute a single browser action and print its outcome as JSON.
pub async fn run(command: RunCommands) -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let mut browser = Browser::new(config, paths)?;

    if !browser.start().await? {
        print_outcome(&ActionOutcome::disabled())?;
        return Ok(());
    }

    let outcome = match command {
        RunCommands::Navigate { url } => browser.navigate(&url).await,
        RunCommands::Click {
            description,
            selector,
            fallback,
            url,
        } => {
            navigate_first(&mut browser, url).await;
            let mut action = Action::click(description);
            if let Some(selector) = selector {
                action = action.with_selector(selector);
            }
            for f in fallback {
                action.add_fallback(f);
            }
            browser.click(&action).await
        }
        RunCommands::Type {
            description,
            text,
            selector,
            url,
        } => {
            navigate_first(&mut browser, url).await;
            let mut action = Action::type_text(description, text);
            if let Some(selector) = selector {
                action = action.with_selector(selector);
            }
            browser.type_text(&action).await
        }
        RunCommands::Screenshot { url } => {
            navigate_first(&mut browser, url).await;
            browser.screenshot().await
        }
        RunCommands::Snapshot { url } => {
            navigate_first(&mut browser, url).await;
            browser.snapshot().await
        }
        RunCommands::Text { url } => {
            navigate_first(&mut browser, url).await;
            browser.extract_text().await
        }
        RunCommands::Wait { seconds } => browser.wait(seconds).await,
    };

    browser.stop().await;
    print_outcome(&outcome)
}

async fn navigate_first(browser: &mut Browser, url: Option<String>) {
    if let Some(url) = url {
        let outcome = browser.navigate(&url).await;
        if !outcome.is_success() {
            tracing::warn!(message = %outcome.message, "pre-navigation failed");
        }
    }
}

fn print_outcome(outcome: &ActionOutcome) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(outcome)?);
    Ok(())
}
