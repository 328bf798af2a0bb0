//! Provider callback reconciliation.
//!
//! A callback is matched to a payment attempt by reference only. Unknown
//! references and already-settled attempts are acknowledged without side
//! effects, so providers re-delivering a callback cannot double-activate.

use std::sync::Arc;

use chrono::Utc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::activation::Activation;
use super::settlement::Settlement;
use crate::gateway::{CallbackStatus, ProviderCallback};
use crate::models::payment::{PaymentAttempt, PaymentStatus};
use crate::store::{PaymentStore, StoreResult};

#[derive(Debug)]
pub enum ReconcileOutcome {
    /// No attempt carries this reference.
    Unmatched,
    /// The attempt was already approved or failed; nothing changed.
    AlreadySettled,
    /// The pending attempt moved to a terminal status.
    Applied {
        payment: PaymentAttempt,
        activation: Option<Activation>,
        notifications: JoinHandle<()>,
    },
}

#[derive(Clone)]
pub struct Reconciler {
    payments: Arc<dyn PaymentStore>,
    settlement: Settlement,
}

impl Reconciler {
    pub fn new(payments: Arc<dyn PaymentStore>, settlement: Settlement) -> Self {
        Self {
            payments,
            settlement,
        }
    }

    pub async fn reconcile(&self, callback: ProviderCallback) -> StoreResult<ReconcileOutcome> {
        let Some(payment) = self.payments.find_by_reference(&callback.reference).await? else {
            warn!(
                source = %callback.source,
                reference = %callback.reference,
                "callback for unknown reference"
            );
            return Ok(ReconcileOutcome::Unmatched);
        };

        if payment.status.is_terminal() {
            info!(
                payment_id = %payment.id,
                status = %payment.status,
                "callback for settled payment ignored"
            );
            return Ok(ReconcileOutcome::AlreadySettled);
        }

        let (status, paid_at) = match callback.status {
            CallbackStatus::Approved => (PaymentStatus::Approved, Some(Utc::now())),
            CallbackStatus::Failed => (PaymentStatus::Failed, None),
        };
        let record = serde_json::json!({
            "source": callback.source,
            "code": callback.code,
            "payload": callback.raw,
            "received_at": Utc::now(),
        });

        // A concurrent callback may have settled it since the lookup.
        let Some(updated) = self
            .payments
            .complete_pending(payment.id, status, record, paid_at)
            .await?
        else {
            info!(payment_id = %payment.id, "payment settled concurrently");
            return Ok(ReconcileOutcome::AlreadySettled);
        };

        info!(
            payment_id = %updated.id,
            reference = %updated.transaction_reference,
            status = %updated.status,
            code = %callback.code,
            "payment reconciled"
        );
        let settled = self.settlement.settle(&updated).await;

        Ok(ReconcileOutcome::Applied {
            payment: updated,
            activation: settled.activation,
            notifications: settled.notifications,
        })
    }
}
