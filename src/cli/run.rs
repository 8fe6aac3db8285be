use anyhow::{Result, bail};

use super::RunArgs;
use crate::core::config::AppConfig;
use crate::core::job::{JobRecord, Phase, StatusView};
use crate::core::orchestrator::{JobService, SubmitRequest};
use crate::core::terminal::{self, print_error, print_info, print_warn};
use crate::logging;

/// Run one job in this process, echoing its log and progress as they land.
/// Ctrl+C cancels the job.
pub(crate) async fn run_job(args: RunArgs) -> Result<()> {
    let config = AppConfig::load(args.config.as_deref()).await?;
    // Process logs stay off the terminal; the job's own log is printed instead.
    logging::init(config.log_level()?, false);
    let service = JobService::from_config(&config)?;

    terminal::print_banner();
    let submitted = service
        .submit(SubmitRequest {
            source_url: args.url,
            requester: args.requester,
            target_project: args.project,
        })
        .await?;
    print_info(&format!("Job {} started", submitted.job_id));

    let record = follow(&service, &submitted.job_id).await?;
    match record.phase {
        Phase::Completed => {
            println!();
            terminal::print_result(&service.result(&record.job_id).await?);
            terminal::print_goodbye();
            Ok(())
        }
        Phase::Cancelled => bail!("Job {} was cancelled", record.job_id),
        _ => {
            for error in &record.errors {
                print_error(&format!("[{}] {}", error.stage, error.message));
            }
            bail!("Job {} failed", record.job_id)
        }
    }
}

async fn follow(service: &JobService, job_id: &str) -> Result<JobRecord> {
    let mut subscription = service.subscribe(job_id).await?;
    let mut record = subscription.snapshot.clone();
    let mut printed_logs = 0;
    let mut last_progress = None;

    loop {
        for entry in record.logs.iter().skip(printed_logs) {
            terminal::print_log_entry(entry);
        }
        printed_logs = record.logs.len();

        let progress = (record.phase, record.progress);
        if last_progress != Some(progress) {
            terminal::print_progress(&StatusView::from_record(&record, 0));
            last_progress = Some(progress);
        }

        if record.is_terminal() {
            return Ok(record);
        }

        tokio::select! {
            update = subscription.recv() => match update {
                Some(next) => record = next,
                None => {
                    let last = service.store().get(job_id).await?;
                    if !last.is_terminal() {
                        bail!("Lost track of job {} while it was {}", job_id, last.phase);
                    }
                    record = last;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                print_warn("Cancelling job...");
                service.cancel(job_id).await?;
            }
        }
    }
}
