use std::{fmt, str::FromStr};

use rust_decimal::{Decimal, serde::float};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

pub type LoanId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum LoanStatus {
    Applied,
    Approved,
    Repaying,
    Closed,
    Rejected,
}

impl LoanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoanStatus::Applied => "Applied",
            LoanStatus::Approved => "Approved",
            LoanStatus::Repaying => "Repaying",
            LoanStatus::Closed => "Closed",
            LoanStatus::Rejected => "Rejected",
        }
    }

    /// Whether the loan has been approved at some point, including loans
    /// that are being repaid or were already paid off.
    pub fn is_approved(&self) -> bool {
        matches!(
            self,
            LoanStatus::Approved | LoanStatus::Repaying | LoanStatus::Closed
        )
    }
}

impl fmt::Display for LoanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("Unknown loan status `{0}`")]
pub struct UnknownStatus(pub String);

impl FromStr for LoanStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Applied" => Ok(LoanStatus::Applied),
            "Approved" => Ok(LoanStatus::Approved),
            "Repaying" => Ok(LoanStatus::Repaying),
            "Closed" => Ok(LoanStatus::Closed),
            "Rejected" => Ok(LoanStatus::Rejected),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("Malformed loan record: {0}")]
    MalformedRecord(#[from] serde_json::Error),
}

/// Client-side mirror of the loan record kept by the contract.
///
/// Unknown fields are ignored when decoding, every other field is required
/// except the repayment history, which the contract may emit as `null`
/// before the first repayment. Amounts are written as JSON numbers, the
/// way the contract stores them, and accepted as numbers or strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Loan {
    #[serde(rename = "LoanID")]
    pub loan_id: LoanId,
    #[serde(rename = "ApplicantName")]
    pub applicant_name: String,
    #[serde(rename = "LoanAmount", serialize_with = "float::serialize")]
    pub principal: Decimal,
    #[serde(rename = "TermMonths")]
    pub term_months: u32,
    #[serde(rename = "InterestRate", serialize_with = "float::serialize")]
    pub interest_rate: Decimal,
    #[serde(rename = "Outstanding", serialize_with = "float::serialize")]
    pub outstanding: Decimal,
    #[serde(rename = "Status")]
    pub status: LoanStatus,
    #[serde(
        rename = "Repayments",
        default,
        deserialize_with = "null_as_empty",
        serialize_with = "numbers"
    )]
    pub repayments: Vec<Decimal>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Decimal>>::deserialize(deserializer)?.unwrap_or_default())
}

fn numbers<S>(values: &[Decimal], serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    struct Number<'a>(&'a Decimal);

    impl Serialize for Number<'_> {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            float::serialize(self.0, serializer)
        }
    }

    serializer.collect_seq(values.iter().map(Number))
}

impl Loan {
    pub fn decode(bytes: &[u8]) -> Result<Self, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn total_repaid(&self) -> Decimal {
        self.repayments.iter().sum()
    }

    pub fn is_settled(&self) -> bool {
        self.outstanding.is_zero()
    }
}
