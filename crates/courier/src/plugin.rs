//! Send pipeline hooks.

use crate::error::Result;
use crate::message::EmailMessage;
use async_trait::async_trait;

/// Hooks run by the [`Mailer`](crate::Mailer) around every send.
///
/// `on_before_send` may modify the message (add headers, sign it). A failing
/// before-hook aborts the send; a failing after-hook is reported but the
/// message has already been accepted by the transport.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Name used in logs and errors. Defaults to the type name.
    fn name(&self) -> &str {
        short_type_name(std::any::type_name::<Self>())
    }

    /// Runs before the transport is invoked.
    ///
    /// # Errors
    ///
    /// Any error aborts the send.
    async fn on_before_send(&self, message: &mut EmailMessage) -> Result<()> {
        let _ = message;
        Ok(())
    }

    /// Runs after the transport accepted the message.
    ///
    /// # Errors
    ///
    /// Errors are reported to the caller of the send.
    async fn on_after_send(&self, message: &EmailMessage) -> Result<()> {
        let _ = message;
        Ok(())
    }
}

/// `a::b::Thing<c::D>` to `Thing`.
fn short_type_name(full: &'static str) -> &'static str {
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
