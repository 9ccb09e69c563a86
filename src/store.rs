use std::collections::HashMap;

use crate::errors::{LendingError, Result};
use crate::model::{Collateral, Installment, Loan, PayoutAccount};
use crate::types::{CollateralId, InstallmentId, LoanId, LoanStatus, UserId};

/// in-memory ownership of all lending records
///
/// loan + collateral always enter and leave together through the package
/// methods, so a half-created or half-deleted pair is unrepresentable
#[derive(Debug, Default)]
pub struct LedgerStore {
    loans: HashMap<LoanId, Loan>,
    collateral: HashMap<CollateralId, Collateral>,
    installments: HashMap<LoanId, Vec<Installment>>,
    payout_accounts: HashMap<UserId, PayoutAccount>,
}

impl LedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// insert a loan with its paired collateral as one unit
    pub fn insert_loan_package(&mut self, loan: Loan, collateral: Collateral) {
        self.collateral.insert(collateral.id, collateral);
        self.loans.insert(loan.id, loan);
    }

    /// remove a loan with its paired collateral and any installments as one
    /// unit, returning the removed pair
    pub fn remove_loan_package(&mut self, loan_id: LoanId) -> Result<(Loan, Collateral)> {
        let loan = self
            .loans
            .remove(&loan_id)
            .ok_or_else(|| LendingError::not_found("loan", loan_id))?;
        let collateral = match self.collateral.remove(&loan.collateral_ref) {
            Some(collateral) => collateral,
            None => {
                // restore the loan rather than leave a widowed record
                let collateral_ref = loan.collateral_ref;
                self.loans.insert(loan.id, loan);
                return Err(LendingError::not_found("collateral", collateral_ref));
            }
        };
        self.installments.remove(&loan_id);
        Ok((loan, collateral))
    }

    pub fn loan(&self, loan_id: LoanId) -> Result<&Loan> {
        self.loans
            .get(&loan_id)
            .ok_or_else(|| LendingError::not_found("loan", loan_id))
    }

    pub fn loan_mut(&mut self, loan_id: LoanId) -> Result<&mut Loan> {
        self.loans
            .get_mut(&loan_id)
            .ok_or_else(|| LendingError::not_found("loan", loan_id))
    }

    pub fn collateral(&self, collateral_id: CollateralId) -> Result<&Collateral> {
        self.collateral
            .get(&collateral_id)
            .ok_or_else(|| LendingError::not_found("collateral", collateral_id))
    }

    pub fn collateral_mut(&mut self, collateral_id: CollateralId) -> Result<&mut Collateral> {
        self.collateral
            .get_mut(&collateral_id)
            .ok_or_else(|| LendingError::not_found("collateral", collateral_id))
    }

    pub fn add_installment(&mut self, installment: Installment) {
        self.installments
            .entry(installment.loan_id)
            .or_default()
            .push(installment);
    }

    /// installments for a loan in creation order
    pub fn installments(&self, loan_id: LoanId) -> &[Installment] {
        self.installments
            .get(&loan_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// earliest-due pending installment; ties keep creation order
    pub fn earliest_pending_installment(&self, loan_id: LoanId) -> Option<&Installment> {
        let mut earliest: Option<&Installment> = None;
        for installment in self.installments(loan_id) {
            if !installment.is_pending() {
                continue;
            }
            match earliest {
                Some(current) if installment.due_date >= current.due_date => {}
                _ => earliest = Some(installment),
            }
        }
        earliest
    }

    pub fn installment_mut(
        &mut self,
        loan_id: LoanId,
        installment_id: InstallmentId,
    ) -> Result<&mut Installment> {
        self.installments
            .get_mut(&loan_id)
            .and_then(|list| list.iter_mut().find(|i| i.id == installment_id))
            .ok_or_else(|| LendingError::not_found("installment", installment_id))
    }

    /// locate the installment a gateway order belongs to
    pub fn find_installment_by_order(&self, order_ref: &str) -> Option<(LoanId, InstallmentId)> {
        for (loan_id, list) in &self.installments {
            for installment in list {
                if installment.external_order_ref.as_deref() == Some(order_ref) {
                    return Some((*loan_id, installment.id));
                }
            }
        }
        None
    }

    /// locate the loan a gateway funding order belongs to
    pub fn find_loan_by_funding_order(&self, order_ref: &str) -> Option<LoanId> {
        self.loans
            .values()
            .find(|loan| loan.funding_order_ref.as_deref() == Some(order_ref))
            .map(|loan| loan.id)
    }

    /// loans requested by a borrower, oldest first
    pub fn loans_by_borrower(&self, borrower_id: UserId) -> Vec<&Loan> {
        let mut loans: Vec<&Loan> = self
            .loans
            .values()
            .filter(|loan| loan.borrower_id == borrower_id)
            .collect();
        loans.sort_by_key(|loan| (loan.created_at, loan.id));
        loans
    }

    /// marketplace listing: active loans awaiting a lender, oldest first
    pub fn open_for_funding(&self) -> Vec<&Loan> {
        let mut loans: Vec<&Loan> = self
            .loans
            .values()
            .filter(|loan| loan.status == LoanStatus::Active)
            .collect();
        loans.sort_by_key(|loan| (loan.created_at, loan.id));
        loans
    }

    pub fn loan_count(&self) -> usize {
        self.loans.len()
    }

    pub fn upsert_payout_account(&mut self, account: PayoutAccount) {
        self.payout_accounts.insert(account.owner_id, account);
    }

    pub fn payout_account(&self, owner_id: UserId) -> Option<&PayoutAccount> {
        self.payout_accounts.get(&owner_id)
    }
}
