//! Tracks the single outbound transfer between authorization and on-chain confirmation.
//!
//! The network never tells us a transfer landed. Confirmation is inferred from refreshed
//! history: a new transaction to the same account for exactly the negated amount.

use crate::{
    address::{same_account, Address},
    amount::format_nano,
    errors::WalletError,
    history::WalletTransaction,
    ledger::SignedQuery,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub to: String,
    pub amount: u128,
    pub comment: Option<String>,
    /// Set once the signer has produced the transfer.
    pub query: Option<SignedQuery>,
    /// Whether the "processing" indicator is shown.
    pub visible: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitPhase {
    /// A deploy went out; the transfer waits for the contract to become active.
    AwaitingContractInit,
    AwaitingConfirmation,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcilerState {
    Idle,
    Signing,
    Submitted(SubmitPhase),
    Confirmed,
    Failed,
}

/// A transfer that passed the local guards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedSend {
    pub to: String,
    pub amount: u128,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub to: String,
    pub amount: u128,
}

impl Confirmation {
    pub fn message(&self) -> String {
        format!("{} TON have been sent", format_nano(self.amount))
    }
}

#[derive(Debug)]
pub struct SendReconciler {
    state: ReconcilerState,
    pending: Option<PendingSend>,
}

impl Default for SendReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl SendReconciler {
    pub const fn new() -> Self {
        Self {
            state: ReconcilerState::Idle,
            pending: None,
        }
    }

    pub const fn state(&self) -> ReconcilerState {
        self.state
    }

    pub const fn pending(&self) -> Option<&PendingSend> {
        self.pending.as_ref()
    }

    /// A transfer is between signing and confirmation.
    pub const fn is_busy(&self) -> bool {
        matches!(
            self.state,
            ReconcilerState::Signing | ReconcilerState::Submitted(_)
        )
    }

    /// Local guards: positive amount, covered by the known balance, parseable destination.
    pub fn authorize(
        &self,
        amount: u128,
        to: &str,
        comment: Option<String>,
        balance: Option<u128>,
    ) -> Result<AuthorizedSend, WalletError> {
        if self.is_busy() {
            return Err(WalletError::AlreadyPending);
        }
        if amount == 0 {
            return Err(WalletError::Validation("amount must be positive".into()));
        }
        match balance {
            Some(b) if amount <= b => {}
            _ => return Err(WalletError::Validation("amount exceeds balance".into())),
        }
        if !Address::is_valid(to) {
            return Err(WalletError::Validation("invalid destination address".into()));
        }
        Ok(AuthorizedSend {
            to: to.to_owned(),
            amount,
            comment: comment.filter(|c| !c.is_empty()),
        })
    }

    pub fn begin_signing(&mut self, send: &AuthorizedSend) -> Result<(), WalletError> {
        if self.is_busy() {
            return Err(WalletError::AlreadyPending);
        }
        self.state = ReconcilerState::Signing;
        self.pending = Some(PendingSend {
            to: send.to.clone(),
            amount: send.amount,
            comment: send.comment.clone(),
            query: None,
            visible: true,
        });
        Ok(())
    }

    /// Record the signer's output. `to` is the destination as actually submitted.
    pub fn signed(&mut self, to: String, query: SignedQuery) {
        if let Some(p) = self.pending.as_mut() {
            p.to = to;
            p.query = Some(query);
        }
    }

    pub fn submitted(&mut self, phase: SubmitPhase) {
        if self.pending.is_some() {
            self.state = ReconcilerState::Submitted(phase);
        }
    }

    /// The sender contract just became active: hand back the deferred transfer, if any.
    pub fn take_deferred(&mut self) -> Option<SignedQuery> {
        if self.state != ReconcilerState::Submitted(SubmitPhase::AwaitingContractInit) {
            return None;
        }
        let query = self.pending.as_ref().and_then(|p| p.query.clone())?;
        self.state = ReconcilerState::Submitted(SubmitPhase::AwaitingConfirmation);
        Some(query)
    }

    /// Match freshly observed transactions against the submitted transfer.
    ///
    /// A match always clears the transfer. It is reported only while the indicator is shown;
    /// a dismissed transfer goes straight back to `Idle`.
    pub fn observe(&mut self, new_transactions: &[WalletTransaction]) -> Option<Confirmation> {
        if !matches!(self.state, ReconcilerState::Submitted(_)) {
            return None;
        }
        let pending = self.pending.as_ref()?;
        let want = i128::try_from(pending.amount).ok()?.checked_neg()?;
        let hit = new_transactions
            .iter()
            .any(|t| t.amount == want && same_account(&t.to_addr, &pending.to));
        if !hit {
            return None;
        }
        let visible = pending.visible;
        let confirmation = Confirmation {
            to: pending.to.clone(),
            amount: pending.amount,
        };
        self.pending = None;
        if visible {
            self.state = ReconcilerState::Confirmed;
            Some(confirmation)
        } else {
            self.state = ReconcilerState::Idle;
            None
        }
    }

    /// The confirmation was shown to the user.
    pub fn acknowledge(&mut self) {
        if self.state == ReconcilerState::Confirmed {
            self.state = ReconcilerState::Idle;
        }
    }

    /// Submission failed. The indicator is hidden; the pending transfer stays until the user
    /// retries or dismisses it.
    pub fn fail(&mut self) {
        self.state = ReconcilerState::Failed;
        if let Some(p) = self.pending.as_mut() {
            p.visible = false;
        }
    }

    /// The user closed the processing indicator. A transfer still on its way out (being signed,
    /// or waiting for the contract deploy) keeps going and is only hidden.
    pub fn dismiss(&mut self) {
        if matches!(
            self.state,
            ReconcilerState::Signing | ReconcilerState::Submitted(SubmitPhase::AwaitingContractInit)
        ) {
            if let Some(p) = self.pending.as_mut() {
                p.visible = false;
            }
            return;
        }
        self.pending = None;
        self.state = ReconcilerState::Idle;
    }

    pub fn reset(&mut self) {
        self.pending = None;
        self.state = ReconcilerState::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::FriendlyFormat;

    fn addr(n: u8) -> Address {
        Address::new(0, [n; 32])
    }

    fn query() -> SignedQuery {
        SignedQuery {
            address: addr(9).canonical(),
            body_b64: "Ym9keQ==".into(),
            state_init: None,
            message_boc_b64: "Ym9j".into(),
        }
    }

    fn out_tx(to: &str, amount: i128, date: i64) -> WalletTransaction {
        WalletTransaction {
            amount,
            from_addr: addr(9).canonical(),
            to_addr: to.into(),
            fee: 0,
            storage_fee: 0,
            other_fee: 0,
            comment: String::new(),
            date,
        }
    }

    fn submitted_send(r: &mut SendReconciler, to: &str, amount: u128) -> eyre::Result<()> {
        let send = r.authorize(amount, to, None, Some(1_000))?;
        r.begin_signing(&send)?;
        r.signed(to.to_owned(), query());
        r.submitted(SubmitPhase::AwaitingConfirmation);
        Ok(())
    }

    #[test]
    fn guards_reject_bad_input() {
        let r = SendReconciler::new();
        let to = addr(1).canonical();
        assert!(matches!(
            r.authorize(0, &to, None, Some(10)),
            Err(WalletError::Validation(_))
        ));
        assert!(matches!(
            r.authorize(11, &to, None, Some(10)),
            Err(WalletError::Validation(_))
        ));
        assert!(matches!(
            r.authorize(5, &to, None, None),
            Err(WalletError::Validation(_))
        ));
        assert!(matches!(
            r.authorize(5, "nope", None, Some(10)),
            Err(WalletError::Validation(_))
        ));
        assert!(r.authorize(10, &to, None, Some(10)).is_ok());
    }

    #[test]
    fn second_authorize_while_submitted_is_rejected() -> eyre::Result<()> {
        let mut r = SendReconciler::new();
        let to = addr(1).canonical();
        submitted_send(&mut r, &to, 100)?;
        assert_eq!(
            r.authorize(5, &to, None, Some(1_000)),
            Err(WalletError::AlreadyPending)
        );
        Ok(())
    }

    #[test]
    fn matching_transaction_confirms_exactly_once() -> eyre::Result<()> {
        let mut r = SendReconciler::new();
        let to = addr(1);
        submitted_send(&mut r, &to.canonical(), 100)?;

        // Raw form of the same account still matches.
        let txs = vec![out_tx(&to.to_raw(), -100, 5)];
        let c = r.observe(&txs).ok_or_else(|| eyre::eyre!("expected confirmation"))?;
        assert_eq!(c.amount, 100);
        assert_eq!(c.message(), "0.0000001 TON have been sent");
        assert!(r.pending().is_none());
        assert_eq!(r.state(), ReconcilerState::Confirmed);
        assert!(r.observe(&txs).is_none());
        r.acknowledge();
        assert_eq!(r.state(), ReconcilerState::Idle);
        assert!(r.authorize(5, &to.canonical(), None, Some(1_000)).is_ok());
        Ok(())
    }

    #[test]
    fn different_address_or_amount_does_not_match() -> eyre::Result<()> {
        let mut r = SendReconciler::new();
        let to = addr(1).canonical();
        submitted_send(&mut r, &to, 100)?;
        assert!(r.observe(&[out_tx(&addr(2).canonical(), -100, 5)]).is_none());
        assert!(r.observe(&[out_tx(&to, -99, 5)]).is_none());
        assert!(r.observe(&[out_tx(&to, 100, 5)]).is_none());
        assert!(r.pending().is_some());
        Ok(())
    }

    #[test]
    fn bounceable_normalization_still_matches() -> eyre::Result<()> {
        let mut r = SendReconciler::new();
        let dest = addr(3);
        let send = r.authorize(50, &dest.canonical(), None, Some(100))?;
        r.begin_signing(&send)?;
        r.signed(dest.to_friendly(FriendlyFormat::NON_BOUNCEABLE), query());
        r.submitted(SubmitPhase::AwaitingConfirmation);
        assert!(r.observe(&[out_tx(&dest.canonical(), -50, 1)]).is_some());
        Ok(())
    }

    #[test]
    fn deferred_transfer_released_once() -> eyre::Result<()> {
        let mut r = SendReconciler::new();
        let to = addr(1).canonical();
        let send = r.authorize(10, &to, None, Some(100))?;
        r.begin_signing(&send)?;
        r.signed(to, query());
        r.submitted(SubmitPhase::AwaitingContractInit);
        assert_eq!(r.take_deferred(), Some(query()));
        assert_eq!(
            r.state(),
            ReconcilerState::Submitted(SubmitPhase::AwaitingConfirmation)
        );
        assert_eq!(r.take_deferred(), None);
        Ok(())
    }

    #[test]
    fn failure_hides_indicator_but_keeps_pending() -> eyre::Result<()> {
        let mut r = SendReconciler::new();
        let to = addr(1).canonical();
        submitted_send(&mut r, &to, 100)?;
        r.fail();
        assert_eq!(r.state(), ReconcilerState::Failed);
        assert_eq!(r.pending().map(|p| p.visible), Some(false));
        // A failed transfer is not matched.
        assert!(r.observe(&[out_tx(&to, -100, 1)]).is_none());
        // User retry is accepted after a failure.
        assert!(r.authorize(100, &to, None, Some(1_000)).is_ok());
        Ok(())
    }

    #[test]
    fn dismiss_clears_pending() -> eyre::Result<()> {
        let mut r = SendReconciler::new();
        let to = addr(1).canonical();
        submitted_send(&mut r, &to, 100)?;
        r.dismiss();
        assert!(r.pending().is_none());
        assert_eq!(r.state(), ReconcilerState::Idle);
        Ok(())
    }

    #[test]
    fn dismissed_while_signing_still_clears_on_landing() -> eyre::Result<()> {
        let mut r = SendReconciler::new();
        let to = addr(1).canonical();
        let send = r.authorize(100, &to, None, Some(1_000))?;
        r.begin_signing(&send)?;
        r.dismiss();
        assert_eq!(r.state(), ReconcilerState::Signing);

        r.signed(to.clone(), query());
        r.submitted(SubmitPhase::AwaitingConfirmation);
        assert!(r.is_busy());

        // Landed but not reported: the indicator was closed.
        assert!(r.observe(&[out_tx(&to, -100, 5)]).is_none());
        assert!(r.pending().is_none());
        assert_eq!(r.state(), ReconcilerState::Idle);
        assert!(r.authorize(10, &to, None, Some(1_000)).is_ok());
        Ok(())
    }

    #[test]
    fn dismiss_keeps_the_transfer_waiting_on_deploy() -> eyre::Result<()> {
        let mut r = SendReconciler::new();
        let to = addr(1).canonical();
        let send = r.authorize(10, &to, None, Some(100))?;
        r.begin_signing(&send)?;
        r.signed(to.clone(), query());
        r.submitted(SubmitPhase::AwaitingContractInit);
        r.dismiss();

        assert_eq!(r.pending().map(|p| p.visible), Some(false));
        assert_eq!(r.take_deferred(), Some(query()));
        assert!(r.observe(&[out_tx(&to, -10, 5)]).is_none());
        assert_eq!(r.state(), ReconcilerState::Idle);
        Ok(())
    }
}
