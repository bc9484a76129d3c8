//! Domain types of the inventory backend.
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

/// Unique identifier of a [`Product`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub u64);

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A phone in stock, in one particular color.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub brand: String,
    pub model: String,
    pub color: String,
    /// Units currently in stock.
    pub stock: u32,
    /// Unit price in cents.
    pub price: u64,
}

/// A product as submitted for insertion, before it was assigned an id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub brand: String,
    pub model: String,
    pub color: String,
    pub stock: u32,
    pub price: u64,
}

impl NewProduct {
    /// Turns this into a [`Product`] with the given `id`.
    pub fn with_id(self, id: ProductId) -> Product {
        let NewProduct {
            brand,
            model,
            color,
            stock,
            price,
        } = self;
        Product {
            id,
            brand,
            model,
            color,
            stock,
            price,
        }
    }
}

/// A recorded sale of one product.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub product: ProductId,
    pub quantity: u32,
    /// Total amount in cents.
    pub amount: u64,
    /// When the sale happened.
    pub sold_at: SystemTime,
}

/// Restricts catalog lookups to a single brand.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BrandFilter {
    /// Products of all brands.
    All,
    /// Only products of the given brand.
    Brand(String),
}

impl BrandFilter {
    /// Returns the brand name, if restricted to one.
    pub fn brand(&self) -> Option<&str> {
        match self {
            Self::All => None,
            Self::Brand(brand) => Some(brand),
        }
    }

    /// Returns `true` if `product` passes this filter.
    pub fn matches(&self, product: &Product) -> bool {
        self.brand().is_none_or(|brand| product.brand == brand)
    }
}

impl From<Option<&str>> for BrandFilter {
    fn from(brand: Option<&str>) -> Self {
        match brand {
            Some(brand) => Self::Brand(brand.to_owned()),
            None => Self::All,
        }
    }
}

/// The time window that dashboard statistics are computed for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatsWindow {
    /// The last 24 hours.
    Today,
    /// The last 7 days.
    Week,
    /// The last 30 days.
    Month,
    /// All recorded sales.
    All,
}

impl StatsWindow {
    /// All known windows.
    pub const ALL: [StatsWindow; 4] = [Self::Today, Self::Week, Self::Month, Self::All];

    /// The maximum age of sales included in this window, `None` meaning unbounded.
    pub fn max_age(&self) -> Option<Duration> {
        const DAY: u64 = 24 * 3600;
        match self {
            Self::Today => Some(Duration::from_secs(DAY)),
            Self::Week => Some(Duration::from_secs(7 * DAY)),
            Self::Month => Some(Duration::from_secs(30 * DAY)),
            Self::All => None,
        }
    }
}

impl AsRef<str> for StatsWindow {
    fn as_ref(&self) -> &str {
        match self {
            Self::Today => "today",
            Self::Week => "week",
            Self::Month => "month",
            Self::All => "all",
        }
    }
}

impl fmt::Display for StatsWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_ref())
    }
}

/// Error returned when parsing an unknown [`StatsWindow`].
#[derive(Debug, thiserror::Error)]
#[error("unknown stats window `{0}`")]
pub struct UnknownStatsWindow(String);

impl FromStr for StatsWindow {
    type Err = UnknownStatsWindow;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|window| window.as_ref() == s)
            .ok_or_else(|| UnknownStatsWindow(s.to_owned()))
    }
}

/// Aggregated numbers shown on the admin dashboard.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DashboardSummary {
    /// Number of distinct products.
    pub products: u64,
    /// Units in stock across all products.
    pub units_in_stock: u64,
    /// Number of products at or below the low stock threshold.
    pub low_stock: u64,
    /// Number of sales in the window.
    pub sales: u64,
    /// Units sold in the window.
    pub units_sold: u64,
    /// Revenue in the window, in cents.
    pub revenue: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_window_roundtrip() {
        for window in StatsWindow::ALL {
            assert_eq!(window.to_string().parse::<StatsWindow>().unwrap(), window);
        }
        assert!("yesterday".parse::<StatsWindow>().is_err());
    }
}
