use crate::{common::*, message as msg};
use tfrecord::EventWriterInit;

/// Writes received metrics to TensorBoard event files under
/// `log_dir/events` until the channel closes.
pub async fn logging_worker(
    log_dir: impl AsRef<Path>,
    mut log_rx: mpsc::Receiver<msg::LogMessage>,
) -> Result<()> {
    let event_dir = log_dir.as_ref().join("events");
    tokio::fs::create_dir_all(&event_dir).await?;

    let mut event_writer = {
        let event_path_prefix = event_dir
            .join("expr-gan")
            .into_os_string()
            .into_string()
            .map_err(|path| format_err!("non-UTF-8 event path {:?}", path))?;

        EventWriterInit::default()
            .from_prefix_async(event_path_prefix, None)
            .await?
    };

    while let Some(msg) = log_rx.recv().await {
        match msg {
            msg::LogMessage::Scalar { tag, step, value } => {
                event_writer
                    .write_scalar_async(tag, step as i64, value as f32)
                    .await?;
            }
            msg::LogMessage::Images { tag, step, images } => {
                event_writer
                    .write_image_list_async(tag, step as i64, images)
                    .await?;
            }
        }
    }

    debug!("logging worker finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn writes_event_file() -> Result<()> {
        let log_dir = std::env::temp_dir().join(format!("expr-gan-logging-{}", std::process::id()));
        let (log_tx, log_rx) = mpsc::channel(4);
        let worker = tokio::spawn(logging_worker(log_dir.clone(), log_rx));

        log_tx
            .send(msg::LogMessage::Scalar {
                tag: "G/rec".into(),
                step: 1,
                value: 0.5,
            })
            .await
            .map_err(|_| format_err!("logging worker is gone"))?;
        drop(log_tx);
        worker.await??;

        let num_files = fs::read_dir(log_dir.join("events"))?.count();
        ensure!(num_files == 1);

        fs::remove_dir_all(&log_dir)?;
        Ok(())
    }
}
