use std::sync::Arc;

use reelbox::Orchestrator;
use reelbox::config::Config;
use reelbox::engine::{MediaEngine, YtDlpEngine};
use reelbox::events::ProgressEvent;
use reelbox::humanize::{format_duration, format_rate};
use reelbox::jobs::Job;

use crate::cli::{CollectionArgs, GetArgs, InfoArgs, ServerArgs};

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

fn engine(config: &Config) -> Arc<dyn MediaEngine> {
    Arc::new(YtDlpEngine::new(config.engine.clone()))
}

pub async fn server(mut config: Config, args: ServerArgs) -> Result<(), AnyError> {
    if let Some(address) = args.address {
        config.server.bind_addr = address;
    }
    let engine = engine(&config);
    reelbox::api::serve(config, engine).await
}

pub async fn info(config: Config, args: InfoArgs) -> Result<(), AnyError> {
    let orchestrator = Orchestrator::from_config(engine(&config), &config);
    let summary = orchestrator.fetch_metadata(&args.url).await?;

    println!("Title:     {}", summary.title);
    println!("Uploader:  {}", summary.uploader);
    println!("Duration:  {}", format_duration(summary.duration_secs));
    if !summary.thumbnail.is_empty() {
        println!("Thumbnail: {}", summary.thumbnail);
    }
    println!("Quality options:");
    for option in &summary.quality_options {
        println!("  {:<28} {}", option.label, option.id);
    }
    Ok(())
}

pub async fn get(config: Config, args: GetArgs) -> Result<(), AnyError> {
    let orchestrator = Orchestrator::from_config(engine(&config), &config);
    let mut events = orchestrator.subscribe();
    let job_id = orchestrator.start_single(&args.url, args.quality.as_deref().unwrap_or_default())?;

    while let Some(event) = events.recv().await {
        if event.target() != job_id {
            continue;
        }
        match event {
            ProgressEvent::Progress { percent, speed, .. } => {
                println!("{:>5.1}%  {}", percent, format_rate(speed));
            }
            ProgressEvent::Complete { filename, .. } => {
                println!("Saved {}", filename.unwrap_or_default());
                return Ok(());
            }
            ProgressEvent::Error { message, .. } => return Err(message.into()),
            ProgressEvent::ItemComplete { .. } => {}
        }
    }
    Err("event stream closed before the download finished".into())
}

pub async fn collection(config: Config, args: CollectionArgs) -> Result<(), AnyError> {
    let orchestrator = Orchestrator::from_config(engine(&config), &config);
    let mut events = orchestrator.subscribe();
    let max_items = args.max.unwrap_or(config.defaults.max_collection_items);
    let batch_id = orchestrator
        .start_collection(&args.url, args.quality.as_deref().unwrap_or_default(), Some(max_items))
        .await?;

    let total = match orchestrator.get_status(batch_id)? {
        Job::Batch(batch) => batch.total_count,
        Job::Single(_) => 1,
    };
    println!("Downloading {} videos", total);

    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::ItemComplete {
                batch_id: id,
                index,
                success,
                title,
                ..
            } if id == batch_id => {
                let status = if success { "ok" } else { "failed" };
                println!(
                    "[{}/{}] {:<6} {}",
                    index + 1,
                    total,
                    status,
                    title.unwrap_or_default()
                );
            }
            ProgressEvent::Complete {
                id, error_count, ..
            } if id == batch_id => {
                let failed = error_count.unwrap_or_default();
                println!("Finished: {} succeeded, {} failed", total - failed, failed);
                if let Job::Batch(batch) = orchestrator.get_status(batch_id)? {
                    for child in &batch.failed_children {
                        println!(
                            "  #{} {}: {}",
                            child.index + 1,
                            child.title.as_deref().unwrap_or("untitled"),
                            child.message
                        );
                    }
                }
                return Ok(());
            }
            _ => {}
        }
    }
    Err("event stream closed before the batch finished".into())
}

pub fn print_config(config: &Config) -> Result<(), AnyError> {
    print!("{}", config.to_toml_string()?);
    Ok(())
}
