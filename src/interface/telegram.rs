use crate::escalation::EscalationJob;
use teloxide::{prelude::*, types::ChatId};
use tokio::sync::mpsc;
use tracing::{error, info};

/// Drains the escalation queue into Telegram chats.
///
/// Each job is sent once. A failed send is logged and dropped; the live chat
/// never waits on this worker.
#[derive(Clone)]
pub struct TelegramNotifier {
    bot: Bot,
}

impl TelegramNotifier {
    pub fn new(token: &str) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;

        Ok(Self {
            bot: Bot::with_client(token, client),
        })
    }

    pub async fn run(self, mut jobs: mpsc::Receiver<EscalationJob>) {
        info!("Telegram escalation worker started");

        while let Some(job) = jobs.recv().await {
            if let Err(e) = self
                .bot
                .send_message(ChatId(job.recipient.0), &job.text)
                .await
            {
                error!(recipient = %job.recipient, "Failed to send notice to Telegram: {}", e);
            }
        }

        info!("Telegram escalation worker stopped");
    }
}
