//! CLI command handlers.

use super::SessionRuntime;
use futures_util::stream::{select_all, StreamExt};
use realtime_channel::ChannelEvent;
use reqwest::Method;
use session_auth::ApiRequest;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Sign in. Reads the password from stdin when not given.
pub async fn login(runtime: &SessionRuntime, email: &str, password: Option<String>) -> CommandResult {
    let password = match password {
        Some(password) => password,
        None => {
            eprint!("Password: ");
            let mut line = String::new();
            BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };

    runtime.session.login(email, &password).await?;
    println!("Logged in as {}", email);
    Ok(())
}

pub fn logout(runtime: &SessionRuntime) -> CommandResult {
    runtime.channel.close();
    runtime.session.logout()?;
    println!("Logged out");
    Ok(())
}

pub fn status(runtime: &SessionRuntime) -> CommandResult {
    let state = runtime.state();
    let status = serde_json::json!({
        "state": state,
        "logged_in": state.is_authenticated(),
        "has_access_token": runtime.store.get_access().is_some(),
        "online": runtime.connectivity.current(),
        "realtime": format!("{:?}", runtime.channel.state()),
        "api_base_url": runtime.config.api_base_url,
        "base_dir": runtime.paths.base_dir().display().to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&status)?);
    Ok(())
}

/// Send an authenticated request and print the response body.
pub async fn request(
    runtime: &SessionRuntime,
    method: &str,
    path: &str,
    data: Option<String>,
) -> CommandResult {
    let method = Method::from_bytes(method.to_uppercase().as_bytes())?;
    let url = runtime.config.api_base_url()?.join(path)?;

    let mut request = ApiRequest::new(method, url.as_str());
    if let Some(data) = data {
        let body: serde_json::Value = serde_json::from_str(&data)?;
        request = request.json(&body)?;
    }

    let response = runtime.gateway.execute(&request).await?;
    eprintln!("HTTP {}", response.status);
    println!("{}", response.body);

    if !response.is_success() {
        return Err(format!("request failed with status {}", response.status).into());
    }
    Ok(())
}

/// Print every update for `recipe_ids` until Ctrl-C.
pub async fn listen(runtime: &SessionRuntime, recipe_ids: Vec<String>) -> CommandResult {
    let subscriptions: Vec<_> = recipe_ids
        .iter()
        .map(|id| runtime.channel.subscribe(id.clone()))
        .collect();
    let mut events = runtime.channel.events();

    if let Err(e) = runtime.connect_realtime().await {
        warn!(error = %e, "Initial realtime connect failed");
        eprintln!("Realtime connect failed: {}. Waiting for the network to return.", e);
    }

    info!(topics = recipe_ids.len(), "Listening for recipe updates");
    let mut updates = select_all(subscriptions);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            update = updates.next() => match update {
                Some(update) => println!("{}", update),
                None => break,
            },
            event = events.recv() => match event {
                Ok(ChannelEvent::Connected) => eprintln!("[connected]"),
                Ok(ChannelEvent::Disconnected(reason)) => {
                    eprintln!("[disconnected: {}]", reason.as_deref().unwrap_or("closed"));
                }
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
        }
    }

    // Give the close frame a moment to reach the server.
    runtime.shutdown();
    tokio::time::sleep(Duration::from_millis(100)).await;
    Ok(())
}
