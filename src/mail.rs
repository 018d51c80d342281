use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::model::{DATE_FORMAT, Reservation};
use crate::observability::{MAIL_DROPPED_TOTAL, MAIL_FAILED_TOTAL, MAIL_SENT_TOTAL};

/// One outgoing message. Delivery is best effort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailData {
    pub to: String,
    pub from: String,
    pub subject: String,
    pub content: String,
    pub template: String,
}

impl MailData {
    pub fn reservation_confirmation(reservation: &Reservation, from: &str) -> Self {
        let content = format!(
            "<p><strong>Reservation Confirmation</strong><br/></p>\
             <p>Dear {}, <br/> This is a confirmation of your booking from {} to {}.</p>",
            reservation.first_name,
            reservation.span.start.format(DATE_FORMAT),
            reservation.span.end.format(DATE_FORMAT),
        );
        Self {
            to: reservation.email.clone(),
            from: from.to_string(),
            subject: "Reservation Confirmation".into(),
            content,
            template: "basic.html".into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("mail transport: {0}")]
    Transport(String),

    #[error("send timed out after {0:?}")]
    Timeout(Duration),
}

/// Delivers one message. Implemented by the SMTP layer outside this crate.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, msg: &MailData) -> Result<(), MailError>;
}

/// Writes messages to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, msg: &MailData) -> Result<(), MailError> {
        info!(to = %msg.to, subject = %msg.subject, "mail sent to log");
        debug!(from = %msg.from, template = %msg.template, "mail body: {}", msg.content);
        Ok(())
    }
}

/// Bounded fan-in to the mail worker. When the worker falls behind the
/// oldest queued messages are overwritten.
#[derive(Debug, Clone)]
pub struct MailQueue {
    tx: broadcast::Sender<MailData>,
}

impl MailQueue {
    /// Queue plus the receiver a worker must drain.
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<MailData>) {
        let (tx, rx) = broadcast::channel(capacity);
        (Self { tx }, rx)
    }

    /// Queue with a worker already spawned on the current runtime. The worker
    /// exits once every clone of the queue has been dropped and the backlog
    /// is sent.
    pub fn start(
        capacity: usize,
        send_timeout: Duration,
        mailer: Arc<dyn Mailer>,
    ) -> (Self, JoinHandle<()>) {
        let (queue, rx) = Self::new(capacity);
        let handle = tokio::spawn(run_mail_worker(rx, mailer, send_timeout));
        (queue, handle)
    }

    /// Never blocks and never fails the caller.
    pub fn dispatch(&self, msg: MailData) {
        if let Err(broadcast::error::SendError(msg)) = self.tx.send(msg) {
            warn!("no mail worker running, dropping message to {}", msg.to);
            metrics::counter!(MAIL_DROPPED_TOTAL).increment(1);
        }
    }
}

pub async fn run_mail_worker(
    mut rx: broadcast::Receiver<MailData>,
    mailer: Arc<dyn Mailer>,
    send_timeout: Duration,
) {
    loop {
        let msg = match rx.recv().await {
            Ok(msg) => msg,
            Err(RecvError::Lagged(skipped)) => {
                warn!("mail queue overflowed, dropped {skipped} messages");
                metrics::counter!(MAIL_DROPPED_TOTAL).increment(skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        let result = match tokio::time::timeout(send_timeout, mailer.send(&msg)).await {
            Ok(result) => result,
            Err(_) => Err(MailError::Timeout(send_timeout)),
        };
        match result {
            Ok(()) => metrics::counter!(MAIL_SENT_TOTAL).increment(1),
            Err(e) => {
                error!("mail to {} failed: {e}", msg.to);
                metrics::counter!(MAIL_FAILED_TOTAL).increment(1);
            }
        }
    }
    info!("mail worker stopped");
}
