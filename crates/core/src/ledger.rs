//! In-memory transaction ledger and the derived dashboard figures.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Budget used when there is no income to derive one from.
pub const FALLBACK_BUDGET: f64 = 50_000.0;
/// Share of income that may be spent before the budget is exhausted.
pub const BUDGET_SHARE: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Income,
    Expense,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub id: String,
    pub description: String,
    pub amount: f64,
    #[serde(rename = "type")]
    pub kind: TransactionType,
    pub category: String,
    pub date: NaiveDate,
}

impl Transaction {
    pub fn new(
        description: impl Into<String>,
        amount: f64,
        kind: TransactionType,
        category: impl Into<String>,
        date: NaiveDate,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            description: description.into(),
            amount,
            kind,
            category: category.into(),
            date,
        }
    }

    /// Every whitespace-separated term must appear in the description, the
    /// category or the amount, ignoring case.
    pub fn matches(&self, search: &str) -> bool {
        let description = self.description.to_lowercase();
        let category = self.category.to_lowercase();
        let amount = self.amount.to_string();
        search
            .to_lowercase()
            .split_whitespace()
            .all(|term| {
                description.contains(term) || category.contains(term) || amount.contains(term)
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_income: f64,
    pub total_expense: f64,
    pub balance: f64,
    pub budget_limit: f64,
    /// Percent of the budget spent, capped at 100.
    pub budget_progress: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Ledger {
    transactions: Vec<Transaction>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ledger preloaded with a month of sample activity.
    pub fn with_sample_data() -> Self {
        let day = |d: u32| NaiveDate::from_ymd_opt(2023, 10, d).unwrap_or_default();
        let rows = [
            ("1", "Monthly Salary", 85000.0, TransactionType::Income, "Income", 1),
            ("2", "House Rent", 25000.0, TransactionType::Expense, "Housing", 2),
            ("3", "D-Mart Grocery", 4500.0, TransactionType::Expense, "Food & Dining", 5),
            ("4", "Netflix Subscription", 649.0, TransactionType::Expense, "Entertainment", 5),
            ("5", "Uber Commute", 450.0, TransactionType::Expense, "Transportation", 6),
            ("6", "Electricity Bill", 2300.0, TransactionType::Expense, "Utilities", 10),
            ("7", "Freelance Project", 15000.0, TransactionType::Income, "Income", 12),
            ("8", "Zomato Order", 850.0, TransactionType::Expense, "Food & Dining", 14),
            ("9", "SIP Investment", 10000.0, TransactionType::Expense, "Investment", 15),
        ];
        let transactions = rows
            .into_iter()
            .map(|(id, description, amount, kind, category, d)| Transaction {
                id: id.to_string(),
                description: description.to_string(),
                amount,
                kind,
                category: category.to_string(),
                date: day(d),
            })
            .collect();
        Self { transactions }
    }

    /// Adds a transaction in front of the existing ones.
    pub fn add(&mut self, transaction: Transaction) {
        self.transactions.insert(0, transaction);
    }

    /// Removes the transaction with `id`, returning it if it existed.
    pub fn delete(&mut self, id: &str) -> Option<Transaction> {
        let index = self.transactions.iter().position(|t| t.id == id)?;
        Some(self.transactions.remove(index))
    }

    /// All transactions, newest first.
    pub fn list(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn filter(&self, kind: Option<TransactionType>, search: &str) -> Vec<Transaction> {
        self.transactions
            .iter()
            .filter(|t| kind.is_none_or(|k| t.kind == k))
            .filter(|t| t.matches(search))
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> Summary {
        let total = |kind| {
            self.transactions
                .iter()
                .filter(|t| t.kind == kind)
                .map(|t| t.amount)
                .sum::<f64>()
        };
        let total_income = total(TransactionType::Income);
        let total_expense = total(TransactionType::Expense);
        let budget_limit = if total_income > 0.0 {
            total_income * BUDGET_SHARE
        } else {
            FALLBACK_BUDGET
        };
        Summary {
            total_income,
            total_expense,
            balance: total_income - total_expense,
            budget_limit,
            budget_progress: (total_expense / budget_limit * 100.0).min(100.0),
        }
    }

    /// Total spent per category.
    pub fn expenses_by_category(&self) -> BTreeMap<String, f64> {
        let mut totals = BTreeMap::new();
        for t in self
            .transactions
            .iter()
            .filter(|t| t.kind == TransactionType::Expense)
        {
            *totals.entry(t.category.clone()).or_insert(0.0) += t.amount;
        }
        totals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn sample_summary() {
        let ledger = Ledger::with_sample_data();
        let summary = ledger.summary();
        assert_relative_eq!(summary.total_income, 100_000.0);
        assert_relative_eq!(summary.total_expense, 43_749.0);
        assert_relative_eq!(summary.balance, 56_251.0);
        assert_relative_eq!(summary.budget_limit, 80_000.0);
        assert_relative_eq!(summary.budget_progress, 43_749.0 / 800.0);
    }

    #[test]
    fn budget_without_income_uses_fallback_and_caps() {
        let mut ledger = Ledger::new();
        let date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        ledger.add(Transaction::new("Laptop", 90_000.0, TransactionType::Expense, "Shopping", date));
        let summary = ledger.summary();
        assert_relative_eq!(summary.budget_limit, FALLBACK_BUDGET);
        assert_relative_eq!(summary.budget_progress, 100.0);
        assert_relative_eq!(summary.balance, -90_000.0);
    }

    #[test]
    fn add_prepends_and_delete_removes() {
        let mut ledger = Ledger::with_sample_data();
        let date = NaiveDate::from_ymd_opt(2023, 10, 20).unwrap();
        let t = Transaction::new("Chai", 20.0, TransactionType::Expense, "Food & Dining", date);
        let id = t.id.clone();
        ledger.add(t);
        assert_eq!(ledger.list()[0].id, id);
        assert_eq!(ledger.list().len(), 10);

        assert!(ledger.delete(&id).is_some());
        assert!(ledger.delete(&id).is_none());
        assert_eq!(ledger.list().len(), 9);
    }

    #[test]
    fn filter_by_kind_and_terms() {
        let ledger = Ledger::with_sample_data();
        assert_eq!(ledger.filter(Some(TransactionType::Income), "").len(), 2);
        assert_eq!(ledger.filter(None, "   ").len(), 9);

        let food = ledger.filter(None, "FOOD order");
        assert_eq!(food.len(), 1);
        assert_eq!(food[0].description, "Zomato Order");

        // Amounts match on their plain digits.
        let rent = ledger.filter(Some(TransactionType::Expense), "25000");
        assert_eq!(rent.len(), 1);
        assert!(ledger.filter(Some(TransactionType::Income), "rent").is_empty());
    }

    #[test]
    fn expenses_grouped_by_category() {
        let totals = Ledger::with_sample_data().expenses_by_category();
        assert_relative_eq!(totals["Food & Dining"], 5_350.0);
        assert!(!totals.contains_key("Income"));
        assert_eq!(totals.len(), 6);
    }

    #[test]
    fn wire_format_uses_type_field() {
        let ledger = Ledger::with_sample_data();
        let json = serde_json::to_value(&ledger.list()[0]).unwrap();
        assert_eq!(json["type"], "INCOME");
        assert_eq!(json["date"], "2023-10-01");
    }
}
