use crate::domain::ledger::LedgerEntry;
use crate::error::Result;
use serde::Serialize;
use std::io::Write;

#[derive(Serialize)]
struct LedgerRow<'a> {
    transaction_id: String,
    account: &'a str,
    currency: &'a str,
    value: String,
    date: String,
    order_id: &'a str,
    memo: &'a str,
    client_type: &'a str,
}

impl<'a> From<&'a LedgerEntry> for LedgerRow<'a> {
    fn from(entry: &'a LedgerEntry) -> Self {
        Self {
            transaction_id: entry.transaction_id.to_string(),
            account: &entry.account,
            currency: entry.currency.as_str(),
            value: entry.value.to_string(),
            date: entry.date.to_rfc3339(),
            order_id: entry.order_id.as_deref().unwrap_or_default(),
            memo: entry.memo.as_deref().unwrap_or_default(),
            client_type: entry.client_type.as_deref().unwrap_or_default(),
        }
    }
}

/// Writes ledger entries as CSV, one row per settlement.
///
/// Missing optional fields are written as empty cells so every row has the
/// same shape.
pub struct LedgerWriter<W: Write> {
    writer: csv::Writer<W>,
}

impl<W: Write> LedgerWriter<W> {
    pub fn new(sink: W) -> Self {
        Self {
            writer: csv::Writer::from_writer(sink),
        }
    }

    /// Writes all entries, ordered by settlement date, and flushes.
    pub fn write_entries(&mut self, mut entries: Vec<LedgerEntry>) -> Result<()> {
        entries.sort_by_key(|entry| entry.date);
        for entry in &entries {
            self.writer.serialize(LedgerRow::from(entry))?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::money::{Amount, CurrencyCode};
    use crate::domain::transaction::TransactionId;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn entry(day: u32, memo: Option<&str>) -> LedgerEntry {
        LedgerEntry {
            account: "merchant-1".to_string(),
            currency: CurrencyCode::parse("XBT").unwrap(),
            value: Amount::new(dec!(0.02000000)).unwrap(),
            date: Utc.with_ymd_and_hms(2026, 1, day, 12, 0, 0).unwrap(),
            transaction_id: TransactionId::new(),
            memo: memo.map(str::to_string),
            client_type: None,
            order_id: Some("order-1".to_string()),
        }
    }

    #[test]
    fn test_writes_sorted_rows_with_header() {
        let later = entry(2, None);
        let earlier = entry(1, Some("thanks"));
        let mut buf = Vec::new();
        {
            let mut writer = LedgerWriter::new(&mut buf);
            writer
                .write_entries(vec![later.clone(), earlier.clone()])
                .unwrap();
        }
        let output = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = output.lines().collect();

        assert_eq!(
            lines[0],
            "transaction_id,account,currency,value,date,order_id,memo,client_type"
        );
        assert_eq!(lines.len(), 3);
        assert!(lines[1].starts_with(&earlier.transaction_id.to_string()));
        assert!(lines[1].contains(",XBT,0.02,"));
        assert!(lines[1].contains(",order-1,thanks,"));
        assert!(lines[2].ends_with(",order-1,,"));
    }

    #[test]
    fn test_empty_ledger_writes_nothing() {
        let mut buf = Vec::new();
        LedgerWriter::new(&mut buf).write_entries(Vec::new()).unwrap();
        assert!(buf.is_empty());
    }
}
