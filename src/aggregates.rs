// Copyright 2025 Cowboy AI, LLC.

//! Per-dimension aggregate state
//!
//! Two independent rollups run over the same merged stream: sales by city
//! and sales by salesperson. Each aggregate accumulates incrementally while
//! its window is open and becomes immutable once the window closes.
//!
//! Side-maps use [`IndexMap`]/[`IndexSet`] so iteration order is insertion
//! order: the "top product" tie break resolves to whichever product was
//! encountered first, deterministically.

use crate::events::SaleEvent;
use crate::window::WindowBounds;
use indexmap::{IndexMap, IndexSet};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;

/// Incremental per-window state for one dimension key
pub trait WindowAggregate:
    Clone + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Row type written to the sink table for this dimension
    type Row: Clone + fmt::Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync;

    /// Dimension name; also names the worker and the sink table
    const DIMENSION: &'static str;

    /// Grouping key for this dimension, absent when the event lacks it
    fn dimension_key(event: &SaleEvent) -> Option<String>;

    /// Fresh state for the first event of a (key, window) pair
    fn new(key: &str, bounds: WindowBounds) -> Self;

    /// Fold one event into the accumulated state
    fn apply(&mut self, event: &SaleEvent);

    /// The dimension key this state belongs to
    fn key(&self) -> &str;

    /// The window this state belongs to
    fn bounds(&self) -> WindowBounds;

    /// Number of events folded in so far
    fn transaction_count(&self) -> u64;

    /// Full-state snapshot row for the sink
    fn to_row(&self) -> Self::Row;
}

/// Rolling sales rollup for one city and window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CitySalesAggregate {
    /// City this rollup covers
    pub city: String,
    /// Window start (epoch milliseconds)
    pub window_start: i64,
    /// Window end (epoch milliseconds)
    pub window_end: i64,
    /// Sum of sale amounts in the window
    pub total_sales: f64,
    /// Number of sales in the window
    pub transaction_count: u64,
    /// Accumulated amount per product name
    pub product_sales: IndexMap<String, f64>,
}

impl CitySalesAggregate {
    /// The product with the highest accumulated amount.
    ///
    /// Ties resolve to the product encountered first; strict comparison over
    /// insertion-ordered iteration keeps that deterministic.
    pub fn top_product(&self) -> Option<(&str, f64)> {
        let mut best: Option<(&str, f64)> = None;
        for (product, amount) in &self.product_sales {
            match best {
                Some((_, best_amount)) if *amount <= best_amount => {}
                _ => best = Some((product.as_str(), *amount)),
            }
        }
        best
    }
}

/// Sink row for the city dimension (`top_sales_by_city`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CitySalesRow {
    /// Dimension key
    pub city: String,
    /// Window start (epoch milliseconds)
    pub window_start: i64,
    /// Window end (epoch milliseconds)
    pub window_end: i64,
    /// Sum of sale amounts in the window
    pub total_sales: f64,
    /// Number of sales in the window
    pub transaction_count: u64,
    /// Best-selling product, if any sale was recorded
    pub top_product: Option<String>,
    /// Amount accumulated by the best-selling product
    pub top_product_sales: f64,
}

impl WindowAggregate for CitySalesAggregate {
    type Row = CitySalesRow;

    const DIMENSION: &'static str = "city";

    fn dimension_key(event: &SaleEvent) -> Option<String> {
        let city = event.city.trim();
        if city.is_empty() {
            None
        } else {
            Some(city.to_string())
        }
    }

    fn new(key: &str, bounds: WindowBounds) -> Self {
        Self {
            city: key.to_string(),
            window_start: bounds.start,
            window_end: bounds.end,
            total_sales: 0.0,
            transaction_count: 0,
            product_sales: IndexMap::new(),
        }
    }

    fn apply(&mut self, event: &SaleEvent) {
        self.total_sales += event.total_amount;
        self.transaction_count += 1;
        *self
            .product_sales
            .entry(event.product_name.clone())
            .or_insert(0.0) += event.total_amount;
    }

    fn key(&self) -> &str {
        &self.city
    }

    fn bounds(&self) -> WindowBounds {
        WindowBounds {
            start: self.window_start,
            end: self.window_end,
        }
    }

    fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    fn to_row(&self) -> CitySalesRow {
        let (top_product, top_product_sales) = match self.top_product() {
            Some((product, amount)) => (Some(product.to_string()), amount),
            None => (None, 0.0),
        };
        CitySalesRow {
            city: self.city.clone(),
            window_start: self.window_start,
            window_end: self.window_end,
            total_sales: self.total_sales,
            transaction_count: self.transaction_count,
            top_product,
            top_product_sales,
        }
    }
}

/// Rolling sales rollup for one salesperson and window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesmanAggregate {
    /// Salesperson id this rollup covers
    pub salesman_id: String,
    /// Display name, captured from the first event in the window
    pub salesman_name: String,
    /// Window start (epoch milliseconds)
    pub window_start: i64,
    /// Window end (epoch milliseconds)
    pub window_end: i64,
    /// Sum of sale amounts in the window
    pub total_sales: f64,
    /// Number of sales in the window
    pub transaction_count: u64,
    /// Cities the salesperson sold in during the window
    pub cities_covered: IndexSet<String>,
}

impl SalesmanAggregate {
    /// Number of distinct cities covered in the window
    pub fn cities_count(&self) -> u32 {
        self.cities_covered.len() as u32
    }
}

/// Sink row for the salesperson dimension (`top_salesman_country`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SalesmanStatsRow {
    /// Dimension key
    pub salesman_id: String,
    /// Display name
    pub salesman_name: String,
    /// Window start (epoch milliseconds)
    pub window_start: i64,
    /// Window end (epoch milliseconds)
    pub window_end: i64,
    /// Sum of sale amounts in the window
    pub total_sales: f64,
    /// Number of sales in the window
    pub transaction_count: u64,
    /// Number of distinct cities covered
    pub cities_covered: u32,
}

impl WindowAggregate for SalesmanAggregate {
    type Row = SalesmanStatsRow;

    const DIMENSION: &'static str = "salesman";

    fn dimension_key(event: &SaleEvent) -> Option<String> {
        let id = event.salesman_id.trim();
        if id.is_empty() {
            None
        } else {
            Some(id.to_string())
        }
    }

    fn new(key: &str, bounds: WindowBounds) -> Self {
        Self {
            salesman_id: key.to_string(),
            salesman_name: String::new(),
            window_start: bounds.start,
            window_end: bounds.end,
            total_sales: 0.0,
            transaction_count: 0,
            cities_covered: IndexSet::new(),
        }
    }

    fn apply(&mut self, event: &SaleEvent) {
        if self.salesman_name.is_empty() {
            self.salesman_name = event.salesman_name.clone();
        }
        self.total_sales += event.total_amount;
        self.transaction_count += 1;
        self.cities_covered.insert(event.city.clone());
    }

    fn key(&self) -> &str {
        &self.salesman_id
    }

    fn bounds(&self) -> WindowBounds {
        WindowBounds {
            start: self.window_start,
            end: self.window_end,
        }
    }

    fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    fn to_row(&self) -> SalesmanStatsRow {
        SalesmanStatsRow {
            salesman_id: self.salesman_id.clone(),
            salesman_name: self.salesman_name.clone(),
            window_start: self.window_start,
            window_end: self.window_end,
            total_sales: self.total_sales,
            transaction_count: self.transaction_count,
            cities_covered: self.cities_count(),
        }
    }
}
