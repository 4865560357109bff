use crate::api::ApiServer;
use crate::audio::{
    CaptureFormat, MonitorCaptureFactory, PulseSinkAllocator, SharedSinkAllocator, SinkAllocator,
};
use crate::client::{DriverClientFactory, DriverSettings};
use crate::config::{Config, StorageBackend};
use crate::notify::{
    ArtifactStore, CompletionNotifier, HttpObjectStore, LocalStore, ShellCommandHook, WebhookHook,
};
use crate::session::{MonitorSettings, SessionBackends, SessionService, SessionSettings};
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// How often the reaper looks for finished sessions.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run_service(config_path: Option<PathBuf>) -> Result<()> {
    info!("Starting meetrec service");

    let config = match &config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let settings = build_session_settings(&config)?;
    std::fs::create_dir_all(&settings.recordings_dir).with_context(|| {
        format!(
            "Failed to create recordings directory {:?}",
            settings.recordings_dir
        )
    })?;
    info!("Recordings directory: {:?}", settings.recordings_dir);

    let backends = build_backends(&config)?;
    let service = SessionService::new(backends, settings);

    let shutdown = CancellationToken::new();
    let reaper = service.spawn_reaper(
        REAP_INTERVAL,
        config.session.retention(),
        shutdown.child_token(),
    );

    let api_server = ApiServer::new(service.clone(), &config.server);
    let server_shutdown = shutdown.clone();
    let mut server = tokio::spawn(async move {
        api_server
            .start(async move { server_shutdown.cancelled().await })
            .await
    });

    info!("meetrec is ready!");
    info!(
        "Try: curl -X POST http://{}:{}/join -H 'Content-Type: application/json' \
         -d '{{\"meeting_url\": \"...\", \"display_name\": \"Recorder\"}}'",
        config.server.host, config.server.port
    );

    let exited_early = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown requested");
            None
        }
        result = &mut server => Some(result),
    };

    shutdown.cancel();
    service.shutdown().await;
    if let Err(e) = reaper.await {
        warn!("Reaper task ended abnormally: {}", e);
    }

    let server_result = match exited_early {
        Some(result) => result,
        None => server.await,
    };
    match server_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("API server failed: {:#}", e),
        Err(e) => error!("API server task panicked: {}", e),
    }

    info!("meetrec stopped");
    Ok(())
}

pub fn build_session_settings(config: &Config) -> Result<SessionSettings> {
    let session = &config.session;
    Ok(SessionSettings {
        monitor: MonitorSettings {
            poll_interval: session.poll_interval(),
            lobby_wait: session.lobby_wait(),
            alone_grace: session.alone_grace(),
        },
        capture_stop_timeout: Duration::from_secs(session.capture_stop_timeout_seconds),
        monitor_stop_timeout: Duration::from_secs(session.monitor_stop_timeout_seconds),
        leave_timeout: Duration::from_secs(session.leave_timeout_seconds),
        notify_timeout: Duration::from_secs(config.notify.webhook_timeout_seconds),
        recordings_dir: config.storage.recordings_dir()?,
    })
}

fn build_backends(config: &Config) -> Result<SessionBackends> {
    let driver = DriverSettings {
        command: config.driver.command.clone(),
        args: config.driver.args.clone(),
        join_timeout: Duration::from_secs(config.session.join_timeout_seconds),
        leave_timeout: Duration::from_secs(config.session.leave_timeout_seconds),
    };

    let sinks: Arc<dyn SinkAllocator> = if config.audio.isolate_sessions {
        Arc::new(PulseSinkAllocator::new(config.audio.sink_prefix.clone()))
    } else {
        info!(
            "Session isolation disabled, all sessions share sink {}",
            config.audio.shared_sink
        );
        Arc::new(SharedSinkAllocator::new(&config.audio.shared_sink))
    };

    let captures = MonitorCaptureFactory::new(CaptureFormat {
        sample_rate: config.audio.sample_rate,
        channels: config.audio.channels,
    });

    Ok(SessionBackends {
        clients: Arc::new(DriverClientFactory::new(driver)),
        captures: Arc::new(captures),
        sinks,
        notifier: Arc::new(build_notifier(config)?),
    })
}

fn build_notifier(config: &Config) -> Result<CompletionNotifier> {
    let storage = &config.storage;
    let store: Box<dyn ArtifactStore> = match storage.backend {
        StorageBackend::Local => Box::new(LocalStore),
        StorageBackend::Http => {
            info!("Uploading recordings to {}", storage.endpoint);
            Box::new(HttpObjectStore::new(
                storage.endpoint.clone(),
                storage.token.clone(),
                Duration::from_secs(storage.upload_timeout_seconds),
            )?)
        }
    };

    let notify = &config.notify;
    let mut notifier = CompletionNotifier::new(store)
        .with_upload_timeout(Duration::from_secs(storage.upload_timeout_seconds))
        .with_hook_timeout(Duration::from_secs(
            notify
                .webhook_timeout_seconds
                .max(notify.post_command_timeout_seconds),
        ));

    if !notify.webhook_url.is_empty() {
        info!("Completion webhook: {}", notify.webhook_url);
        notifier = notifier.with_hook(Arc::new(WebhookHook::new(
            notify.webhook_url.clone(),
            Duration::from_secs(notify.webhook_timeout_seconds),
        )?));
    }
    if !notify.post_command.trim().is_empty() {
        info!("Post-session command configured");
        notifier = notifier.with_hook(Arc::new(ShellCommandHook::new(
            notify.post_command.clone(),
            notify.post_command_timeout_seconds,
        )));
    }

    Ok(notifier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_settings_from_config() {
        let mut config = Config::default();
        config.session.lobby_wait_minutes = 10;
        config.session.alone_grace_seconds = 120;
        config.storage.recordings_dir = Some(PathBuf::from("/var/lib/meetrec"));

        let settings = build_session_settings(&config).unwrap();
        assert_eq!(settings.monitor.lobby_wait, Duration::from_secs(600));
        assert_eq!(settings.monitor.alone_grace, Duration::from_secs(120));
        assert_eq!(settings.monitor.poll_interval, Duration::from_secs(1));
        assert_eq!(settings.capture_stop_timeout, Duration::from_secs(5));
        assert_eq!(settings.recordings_dir, PathBuf::from("/var/lib/meetrec"));
    }

    #[test]
    fn test_backends_build_with_hooks() {
        let mut config = Config::default();
        config.notify.webhook_url = "http://127.0.0.1:9/hook".to_string();
        config.notify.post_command = "cat > /dev/null".to_string();
        assert!(build_backends(&config).is_ok());
    }
}
