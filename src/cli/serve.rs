use std::time::Duration;

use anyhow::Result;
use console::style;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::ServeArgs;
use crate::core::config::AppConfig;
use crate::core::job::JobStore;
use crate::core::orchestrator::JobService;
use crate::core::terminal::{self, GuideSection};
use crate::interfaces::web::{ApiServer, ApiServerConfig};
use crate::logging;

pub(crate) async fn run_serve(args: ServeArgs) -> Result<()> {
    let mut config = AppConfig::load(args.config.as_deref()).await?;
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.validate()?;

    let log_tx = logging::init(config.log_level()?, config.logging.stdout);
    let service = JobService::from_config(&config)?;
    info!(
        provider = %config.llm.provider,
        model = %config.llm.model,
        "Job service ready"
    );

    let shutdown = CancellationToken::new();
    let sweeper = match config.pipeline.retention() {
        Some(retention) => Some(spawn_retention_sweeper(
            service.store().clone(),
            retention,
            config.pipeline.sweep_interval(),
            shutdown.clone(),
        )),
        None => {
            info!("Job retention disabled, finished jobs are kept until restart");
            None
        }
    };

    terminal::print_banner();
    let base_url = format!("http://{}:{}", config.server.host, config.server.port);
    GuideSection::new("API Server")
        .status(
            "Listening",
            &format!("{}", style(&base_url).underlined().cyan()),
        )
        .status("Submit", &format!("POST {}/api/jobs", base_url))
        .status("Logs", &format!("GET {}/api/logs", base_url))
        .blank()
        .status(
            "Press Ctrl+C to stop the server.",
            &format!("{}", style("Ctrl+C").bold().yellow()),
        )
        .print();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown requested"),
            Err(e) => warn!("Failed to listen for Ctrl+C: {}", e),
        }
        signal.cancel();
    });

    let server = ApiServer::new(ApiServerConfig {
        service,
        log_tx,
        host: config.server.host.clone(),
        port: config.server.port,
        heartbeat: config.pipeline.heartbeat(),
        cors_origins: config.server.cors_origins.clone(),
    });
    let served = server.serve(shutdown.clone()).await;

    shutdown.cancel();
    if let Some(sweeper) = sweeper {
        let _ = sweeper.await;
    }
    served?;
    terminal::print_goodbye();
    Ok(())
}

/// Evict finished jobs older than `retention` every `every` until `shutdown`.
pub(crate) fn spawn_retention_sweeper(
    store: JobStore,
    retention: Duration,
    every: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let evicted = store.evict_terminal(retention).await;
                    if evicted > 0 {
                        info!(evicted, "Evicted finished jobs past retention");
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::job::StageKind;
    use crate::core::orchestrator::SubmitRequest;
    use crate::core::testing::{Behavior, SITE, fake_service, wait_terminal};

    #[tokio::test]
    async fn sweeper_evicts_finished_jobs_and_keeps_running_ones() {
        let service = fake_service(&[(StageKind::DemoContent, Behavior::Hang)]);
        let finished = fake_service(&[]);

        let running = service
            .submit(SubmitRequest {
                source_url: SITE.to_string(),
                ..SubmitRequest::default()
            })
            .await
            .unwrap();
        let done = finished
            .submit(SubmitRequest {
                source_url: SITE.to_string(),
                ..SubmitRequest::default()
            })
            .await
            .unwrap();
        wait_terminal(finished.store(), &done.job_id).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        let shutdown = CancellationToken::new();
        let sweepers = [
            spawn_retention_sweeper(
                service.store().clone(),
                Duration::from_millis(1),
                Duration::from_millis(5),
                shutdown.clone(),
            ),
            spawn_retention_sweeper(
                finished.store().clone(),
                Duration::from_millis(1),
                Duration::from_millis(5),
                shutdown.clone(),
            ),
        ];

        tokio::time::timeout(Duration::from_secs(5), async {
            while finished.store().len().await > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(service.store().get(&running.job_id).await.is_ok());

        shutdown.cancel();
        for sweeper in sweepers {
            tokio::time::timeout(Duration::from_secs(5), sweeper)
                .await
                .unwrap()
                .unwrap();
        }
        service.cancel(&running.job_id).await.unwrap();
    }
}
