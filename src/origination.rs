use hourglass_rs::SafeTimeProvider;
use rust_decimal::Decimal;
use tracing::info;

use crate::clients::{ChainClient, ContractCall, PriceOracle};
use crate::config::PlatformConfig;
use crate::decimal::Money;
use crate::errors::{LendingError, Result};
use crate::events::{Event, EventStore};
use crate::interest::InterestCalculator;
use crate::model::{Collateral, CollateralSpec, Loan};
use crate::store::LedgerStore;
use crate::types::{LoanId, LoanStatus, UserId};

/// loan creation request as received from the borrower
#[derive(Debug, Clone, PartialEq)]
pub struct CreateLoanRequest {
    pub borrower_id: UserId,
    pub collateral: CollateralSpec,
    pub principal: Money,
    pub interest_rate_bps: u32,
    pub ltv_bps: u32,
    pub duration_days: u32,
}

/// origination: draft creation, cancellation, and on-chain confirmation
pub struct LoanOriginator {
    config: PlatformConfig,
    calculator: InterestCalculator,
}

impl LoanOriginator {
    pub fn new(config: &PlatformConfig) -> Self {
        Self {
            config: config.clone(),
            calculator: InterestCalculator::from_config(config),
        }
    }

    /// validate a request, value the pledge, and store the draft loan and
    /// its collateral as one unit
    pub fn create_loan(
        &self,
        request: CreateLoanRequest,
        oracle: &dyn PriceOracle,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<LoanId> {
        // bounds first, collaborators later
        if !request.principal.is_positive() || request.principal < self.config.min_loan_amount {
            return Err(LendingError::validation("Invalid loan amount"));
        }
        if request.principal > self.config.max_loan_amount {
            return Err(LendingError::validation("Loan amount is too high"));
        }
        if request.interest_rate_bps > self.config.max_interest_rate_bps {
            return Err(LendingError::validation("Invalid interest rate"));
        }
        if request.ltv_bps == 0 || Decimal::from(request.ltv_bps) > self.config.ltv_ceiling.as_bps()
        {
            return Err(LendingError::validation("Invalid loan-to-value ratio"));
        }
        let duration_seconds = i64::from(request.duration_days) * 86_400;
        if duration_seconds < self.config.min_duration_seconds
            || duration_seconds > self.config.max_duration_seconds
            || duration_seconds % self.config.installment_period_seconds != 0
        {
            return Err(LendingError::validation("Invalid loan duration"));
        }
        if !request.collateral.amount.is_positive() {
            return Err(LendingError::validation("Invalid collateral amount"));
        }

        // value the pledge; an unavailable oracle aborts the request
        let collateral_value =
            oracle.value_of(request.collateral.token_type, request.collateral.amount)?;
        if request.principal > collateral_value * self.config.ltv_ceiling.as_decimal() {
            return Err(LendingError::validation("Insufficient collateral"));
        }

        let total_installments = self.config.total_installments(duration_seconds);
        let installment_amount = self.calculator.installment_amount(
            request.principal,
            request.interest_rate_bps,
            total_installments,
        )?;

        let now = time_provider.now();
        let collateral = Collateral::pledge(
            request.borrower_id,
            request.collateral.token_type,
            request.collateral.amount,
            collateral_value,
        );
        let loan = Loan::draft(
            request.borrower_id,
            collateral.id,
            request.principal,
            request.interest_rate_bps,
            request.ltv_bps,
            duration_seconds,
            total_installments,
            installment_amount,
            now,
        );
        let loan_id = loan.id;

        events.emit(Event::LoanCreated {
            loan_id,
            borrower_id: request.borrower_id,
            principal: request.principal,
            collateral_token: request.collateral.token_type,
            collateral_amount: request.collateral.amount,
            timestamp: now,
        });
        store.insert_loan_package(loan, collateral);

        info!(%loan_id, principal = %request.principal, "loan drafted");
        Ok(loan_id)
    }

    /// drop a draft loan and its collateral in one step
    pub fn cancel_loan(
        &self,
        loan_id: LoanId,
        actor: UserId,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let loan = store.loan(loan_id)?;
        if loan.borrower_id != actor {
            return Err(LendingError::authorization(
                "only the borrower can cancel a loan",
            ));
        }
        if loan.status != LoanStatus::Draft {
            return Err(LendingError::state_conflict("Invalid loan status"));
        }

        let (_, collateral) = store.remove_loan_package(loan_id)?;
        events.emit(Event::LoanCancelled {
            loan_id,
            collateral_id: collateral.id,
            timestamp: time_provider.now(),
        });

        info!(%loan_id, "draft loan cancelled");
        Ok(())
    }

    /// verify the submitted creation transaction and activate the loan
    ///
    /// replaying the same confirmation against an already-Active loan is
    /// accepted as a no-op; any mismatch between the decoded call and the
    /// stored loan fails closed
    pub fn confirm_creation(
        &self,
        loan_id: LoanId,
        tx_hash: &str,
        chain: &dyn ChainClient,
        store: &mut LedgerStore,
        events: &mut EventStore,
        time_provider: &SafeTimeProvider,
    ) -> Result<()> {
        let (collateral_ref, loan_matches) = {
            let loan = store.loan(loan_id)?;
            match loan.status {
                LoanStatus::Active => return Ok(()),
                LoanStatus::Draft => {}
                _ => return Err(LendingError::state_conflict("Invalid loan status")),
            }
            (loan.collateral_ref, loan.clone())
        };
        let collateral_matches = store.collateral(collateral_ref)?.clone();

        if !is_tx_hash(tx_hash) {
            return Err(LendingError::validation("Invalid transaction hash"));
        }
        let tx = chain
            .get_transaction(tx_hash)?
            .ok_or_else(|| LendingError::not_found("transaction", tx_hash))?;
        let receipt = chain
            .get_receipt(tx_hash)?
            .ok_or_else(|| LendingError::not_found("transaction receipt", tx_hash))?;
        if !receipt.success {
            return Err(LendingError::validation("Transaction failed"));
        }
        if !tx.to.eq_ignore_ascii_case(&self.config.contract_address) {
            return Err(LendingError::validation(
                "Transaction recipient is not the loan contract",
            ));
        }

        match tx.call {
            Some(ContractCall::CreateLoan {
                ref loan_id,
                amount,
                interest_rate_bps,
                ltv_bps,
                duration_seconds,
                collateral_token,
                collateral_amount,
            }) if *loan_id == loan_matches.id.to_string()
                && amount == loan_matches.principal
                && interest_rate_bps == loan_matches.interest_rate_bps
                && ltv_bps == loan_matches.ltv_bps
                && duration_seconds == loan_matches.duration_seconds
                && collateral_token == collateral_matches.token_type
                && collateral_amount == collateral_matches.amount => {}
            Some(ContractCall::CreateLoan { .. }) => {
                return Err(LendingError::validation(
                    "Transaction data does not match the loan",
                ));
            }
            _ => {
                return Err(LendingError::validation(
                    "Transaction does not create a loan",
                ));
            }
        }

        let creation_logged = receipt
            .logs
            .iter()
            .any(|log| log.event_signature == self.config.creation_event_signature);
        if !creation_logged {
            return Err(LendingError::validation(
                "Loan creation event missing from receipt",
            ));
        }

        // every check passed: lock the pledge and open the loan for funding
        let now = time_provider.now();
        store.collateral_mut(collateral_ref)?.lock(tx_hash.to_string());
        store.loan_mut(loan_id)?.status = LoanStatus::Active;

        events.emit(Event::CollateralLocked {
            collateral_id: collateral_ref,
            loan_id,
            lock_tx_hash: tx_hash.to_string(),
            timestamp: now,
        });
        events.emit(Event::LoanActivated {
            loan_id,
            creation_tx_hash: tx_hash.to_string(),
            timestamp: now,
        });

        info!(%loan_id, tx_hash, "loan activated after on-chain confirmation");
        Ok(())
    }
}

fn is_tx_hash(value: &str) -> bool {
    value.len() == 66
        && value.starts_with("0x")
        && value.as_bytes()[2..].iter().all(u8::is_ascii_hexdigit)
}
