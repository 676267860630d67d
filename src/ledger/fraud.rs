//! Fraud screen
//!
//! A single amount threshold. Anything above it scores 100 and is flagged.

use rust_decimal::Decimal;

use crate::domain::Transaction;

/// Scores above this are flagged
pub const FLAG_THRESHOLD: u8 = 80;

pub const HIGH_RISK_REASON: &str = "High risk transaction detected";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FraudAssessment {
    pub risk_score: u8,
}

impl FraudAssessment {
    pub fn is_suspicious(&self) -> bool {
        self.risk_score > FLAG_THRESHOLD
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FraudScreen {
    amount_threshold: Decimal,
}

impl Default for FraudScreen {
    fn default() -> Self {
        Self::new(Decimal::new(100_000, 2))
    }
}

impl FraudScreen {
    pub fn new(amount_threshold: Decimal) -> Self {
        Self { amount_threshold }
    }

    pub fn assess(&self, tx: &Transaction) -> FraudAssessment {
        let risk_score = if tx.amount.value() > self.amount_threshold {
            100
        } else {
            10
        };
        FraudAssessment { risk_score }
    }
}
