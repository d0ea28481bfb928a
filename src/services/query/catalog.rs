//! Fixed metric catalog
//!
//! Base metrics map one-to-one onto summable fact columns. Derived metrics are
//! ratios over base sums and are never stored.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::storage::backend::{BaseColumn, SortTarget};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricFormat {
    Integer,
    Decimal,
    Currency,
    Percent,
}

/// `numerator / denominator * scale`; undefined when the denominator sums to 0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Formula {
    pub name: &'static str,
    pub numerator: BaseColumn,
    pub denominator: BaseColumn,
    pub scale: f64,
}

impl Formula {
    pub fn evaluate(&self, sums: &BTreeMap<BaseColumn, f64>) -> Option<f64> {
        let numerator = sums.get(&self.numerator).copied()?;
        let denominator = sums.get(&self.denominator).copied()?;
        if denominator == 0.0 {
            return None;
        }
        Some(numerator / denominator * self.scale)
    }

    pub fn requires(&self) -> [BaseColumn; 2] {
        [self.numerator, self.denominator]
    }

    pub fn sort_target(&self) -> SortTarget {
        SortTarget::Ratio {
            numerator: self.numerator,
            denominator: self.denominator,
            scale: self.scale,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricKind {
    Base(BaseColumn),
    Derived(Formula),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricCatalogEntry {
    pub key: &'static str,
    pub label: &'static str,
    pub format: MetricFormat,
    pub kind: MetricKind,
}

impl MetricCatalogEntry {
    pub fn is_derived(&self) -> bool {
        matches!(self.kind, MetricKind::Derived(_))
    }

    /// Base columns needed to produce this metric
    pub fn required_columns(&self) -> Vec<BaseColumn> {
        match self.kind {
            MetricKind::Base(column) => vec![column],
            MetricKind::Derived(formula) => formula.requires().to_vec(),
        }
    }

    pub fn value(&self, sums: &BTreeMap<BaseColumn, f64>) -> Option<f64> {
        match self.kind {
            MetricKind::Base(column) => Some(sums.get(&column).copied().unwrap_or(0.0)),
            MetricKind::Derived(formula) => formula.evaluate(sums),
        }
    }
}

const fn base(
    key: &'static str,
    label: &'static str,
    format: MetricFormat,
    column: BaseColumn,
) -> MetricCatalogEntry {
    MetricCatalogEntry {
        key,
        label,
        format,
        kind: MetricKind::Base(column),
    }
}

const fn derived(
    key: &'static str,
    label: &'static str,
    format: MetricFormat,
    numerator: BaseColumn,
    denominator: BaseColumn,
    scale: f64,
) -> MetricCatalogEntry {
    MetricCatalogEntry {
        key,
        label,
        format,
        kind: MetricKind::Derived(Formula {
            name: key,
            numerator,
            denominator,
            scale,
        }),
    }
}

pub const CATALOG: &[MetricCatalogEntry] = &[
    base("impressions", "Impressions", MetricFormat::Integer, BaseColumn::Impressions),
    base("clicks", "Clicks", MetricFormat::Integer, BaseColumn::Clicks),
    base("spend", "Spend", MetricFormat::Currency, BaseColumn::Spend),
    base("conversions", "Conversions", MetricFormat::Decimal, BaseColumn::Conversions),
    base("revenue", "Revenue", MetricFormat::Currency, BaseColumn::Revenue),
    base("sessions", "Sessions", MetricFormat::Integer, BaseColumn::Sessions),
    base("leads", "Leads", MetricFormat::Decimal, BaseColumn::Leads),
    derived(
        "ctr",
        "Click-through rate",
        MetricFormat::Percent,
        BaseColumn::Clicks,
        BaseColumn::Impressions,
        1.0,
    ),
    derived(
        "cpc",
        "Cost per click",
        MetricFormat::Currency,
        BaseColumn::Spend,
        BaseColumn::Clicks,
        1.0,
    ),
    derived(
        "cpm",
        "Cost per mille",
        MetricFormat::Currency,
        BaseColumn::Spend,
        BaseColumn::Impressions,
        1000.0,
    ),
    derived(
        "cpa",
        "Cost per acquisition",
        MetricFormat::Currency,
        BaseColumn::Spend,
        BaseColumn::Conversions,
        1.0,
    ),
    derived(
        "roas",
        "Return on ad spend",
        MetricFormat::Decimal,
        BaseColumn::Revenue,
        BaseColumn::Spend,
        1.0,
    ),
];

pub fn lookup(key: &str) -> Option<&'static MetricCatalogEntry> {
    CATALOG.iter().find(|entry| entry.key == key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sums(pairs: &[(BaseColumn, f64)]) -> BTreeMap<BaseColumn, f64> {
        pairs.iter().copied().collect()
    }

    fn base_entry(column: BaseColumn) -> Option<&'static MetricCatalogEntry> {
        CATALOG
            .iter()
            .find(|entry| entry.kind == MetricKind::Base(column))
    }

    #[test]
    fn test_ctr_and_cpc_from_base_sums() {
        let sums = sums(&[
            (BaseColumn::Impressions, 200.0),
            (BaseColumn::Clicks, 20.0),
            (BaseColumn::Spend, 10.0),
        ]);
        assert_eq!(lookup("ctr").unwrap().value(&sums), Some(0.1));
        assert_eq!(lookup("cpc").unwrap().value(&sums), Some(0.5));
        let cpm = lookup("cpm").unwrap().value(&sums).unwrap();
        assert!((cpm - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_zero_denominator_is_undefined() {
        let sums = sums(&[(BaseColumn::Spend, 10.0), (BaseColumn::Conversions, 0.0)]);
        assert_eq!(lookup("cpa").unwrap().value(&sums), None);
    }

    #[test]
    fn test_every_derived_formula_uses_catalog_bases() {
        for entry in CATALOG.iter().filter(|e| e.is_derived()) {
            for column in entry.required_columns() {
                assert!(base_entry(column).is_some(), "{} needs {:?}", entry.key, column);
            }
        }
        assert!(lookup("bounce_rate").is_none());
    }
}
