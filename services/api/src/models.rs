//! API Models
//!
//! Request and response bodies, annotated for OpenAPI generation with `utoipa`.

use aijaz_core::{
    assistant::{ChatReply, Source},
    ledger::{Summary, Transaction, TransactionType},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use utoipa::{IntoParams, ToSchema};

#[derive(Debug, Serialize, Deserialize, ToSchema, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionKind {
    Income,
    Expense,
}

impl From<TransactionType> for TransactionKind {
    fn from(kind: TransactionType) -> Self {
        match kind {
            TransactionType::Income => TransactionKind::Income,
            TransactionType::Expense => TransactionKind::Expense,
        }
    }
}

impl From<TransactionKind> for TransactionType {
    fn from(kind: TransactionKind) -> Self {
        match kind {
            TransactionKind::Income => TransactionType::Income,
            TransactionKind::Expense => TransactionType::Expense,
        }
    }
}

#[derive(Serialize, Deserialize, ToSchema, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    pub id: String,
    #[schema(example = "D-Mart Grocery")]
    pub description: String,
    #[schema(example = 4500.0)]
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    #[schema(example = "Food & Dining")]
    pub category: String,
    pub date: NaiveDate,
}

impl From<Transaction> for TransactionResponse {
    fn from(t: Transaction) -> Self {
        Self {
            id: t.id,
            description: t.description,
            amount: t.amount,
            kind: t.kind.into(),
            category: t.category,
            date: t.date,
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionPayload {
    #[schema(example = "Zomato Order")]
    pub description: String,
    #[schema(example = 850.0)]
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Filled in by the assistant when omitted.
    pub category: Option<String>,
    /// Defaults to today.
    pub date: Option<NaiveDate>,
}

#[derive(Deserialize, IntoParams, Debug, Default)]
#[into_params(parameter_in = Query)]
pub struct TransactionQuery {
    /// Only transactions of this type.
    #[serde(rename = "type")]
    pub kind: Option<TransactionKind>,
    /// Whitespace-separated terms matched against description, category and amount.
    pub search: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SummaryResponse {
    pub total_income: f64,
    pub total_expense: f64,
    pub balance: f64,
    pub budget_limit: f64,
    /// Percent of the budget spent, capped at 100.
    pub budget_progress: f64,
    pub expenses_by_category: BTreeMap<String, f64>,
}

impl SummaryResponse {
    pub fn new(summary: Summary, expenses_by_category: BTreeMap<String, f64>) -> Self {
        Self {
            total_income: summary.total_income,
            total_expense: summary.total_expense,
            balance: summary.balance,
            budget_limit: summary.budget_limit,
            budget_progress: summary.budget_progress,
            expenses_by_category,
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct InsightResponse {
    pub insight: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct CategorizePayload {
    #[schema(example = "Uber to office")]
    pub description: String,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct CategoryResponse {
    pub category: String,
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct ChatPayload {
    #[schema(example = "How can I save more on groceries?")]
    pub message: String,
    /// Earlier turns, oldest first.
    #[serde(default)]
    pub history: Vec<String>,
}

#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SourceResponse {
    pub title: String,
    pub uri: String,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ChatResponse {
    pub text: String,
    pub sources: Vec<SourceResponse>,
}

impl From<ChatReply> for ChatResponse {
    fn from(reply: ChatReply) -> Self {
        Self {
            text: reply.text,
            sources: reply
                .sources
                .into_iter()
                .map(|Source { title, uri }| SourceResponse { title, uri })
                .collect(),
        }
    }
}

#[derive(Deserialize, ToSchema, Debug)]
pub struct SpeechPayload {
    pub text: String,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SpeechResponse {
    /// Base64 PCM16 mono at 24 kHz, absent when synthesis failed or returned
    /// nothing playable.
    pub audio: Option<String>,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_kind_serialization() {
        assert_eq!(
            serde_json::to_string(&TransactionKind::Income).unwrap(),
            "\"INCOME\""
        );
        let kind: TransactionKind = serde_json::from_str("\"EXPENSE\"").unwrap();
        assert_eq!(kind, TransactionKind::Expense);
        assert!(serde_json::from_str::<TransactionKind>("\"expense\"").is_err());
    }

    #[test]
    fn test_create_payload_optional_fields() {
        let payload: CreateTransactionPayload = serde_json::from_str(
            r#"{"description": "Chai", "amount": 20, "type": "EXPENSE"}"#,
        )
        .unwrap();
        assert_eq!(payload.kind, TransactionKind::Expense);
        assert!(payload.category.is_none());
        assert!(payload.date.is_none());
    }

    #[test]
    fn test_transaction_response_matches_ledger_wire_format() {
        let t = Transaction::new(
            "Chai",
            20.0,
            TransactionType::Expense,
            "Food & Dining",
            NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
        );
        let core = serde_json::to_value(&t).unwrap();
        let api = serde_json::to_value(TransactionResponse::from(t)).unwrap();
        assert_eq!(core, api);
    }

    #[test]
    fn test_chat_history_defaults_to_empty() {
        let payload: ChatPayload = serde_json::from_str(r#"{"message": "hi"}"#).unwrap();
        assert!(payload.history.is_empty());
    }
}
