//! Record types stored in the `customers` and `invoices` tables

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::DataError;

/// Calendar date format used by `Invoice::date`.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A customer row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Customer {
    pub id: String,
    pub name: String,
}

/// An invoice row. `customer_id` is stored as `customerId`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub id: String,
    pub reference: String,
    pub customer_id: String,
    /// `YYYY-MM-DD`
    pub date: String,
    pub status: InvoiceStatus,
}

impl Invoice {
    /// Parsed `date`.
    pub fn calendar_date(&self) -> Result<NaiveDate, DataError> {
        NaiveDate::parse_from_str(&self.date, DATE_FORMAT)
            .map_err(|_| DataError::InvalidDate(self.date.clone()))
    }
}

/// Invoice lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceStatus {
    Draft,
    Edited,
    Paid,
}

impl InvoiceStatus {
    pub const ALL: [InvoiceStatus; 3] = [
        InvoiceStatus::Draft,
        InvoiceStatus::Edited,
        InvoiceStatus::Paid,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InvoiceStatus::Draft => "draft",
            InvoiceStatus::Edited => "edited",
            InvoiceStatus::Paid => "paid",
        }
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InvoiceStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown invoice status: {}", s))
    }
}
