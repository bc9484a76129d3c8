use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use stocktaker_service::catalog::{CatalogError, CatalogService};
use stocktaker_service::store::InMemoryStore;
use stocktaker_service::types::{NewProduct, ProductId, StatsWindow};

#[derive(Debug, Deserialize, Serialize)]
pub struct WorkloadsConfig {
    #[serde(default)]
    pub store: StoreConfig,
    pub workloads: Vec<Workload>,
}

/// Shape of the generated inventory that all workloads run against.
#[derive(Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Artificial latency of every read query.
    #[serde(with = "humantime_serde")]
    pub latency: Duration,
    pub brands: usize,
    pub models_per_brand: usize,
    pub colors: Vec<String>,
    /// Initial units in stock of every product.
    pub stock: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            latency: Duration::from_millis(20),
            brands: 5,
            models_per_brand: 10,
            colors: vec!["black".into(), "white".into(), "blue".into()],
            stock: 1_000,
        }
    }
}

impl StoreConfig {
    pub fn product_count(&self) -> u64 {
        (self.brands * self.models_per_brand * self.colors.len()) as u64
    }

    /// Creates the store, populated with one product per brand, model and color.
    pub fn build(&self) -> InMemoryStore {
        let mut products = Vec::new();
        for brand in 0..self.brands {
            for model in 0..self.models_per_brand {
                for color in &self.colors {
                    products.push(NewProduct {
                        brand: format!("Brand{brand}"),
                        model: format!("Model{brand}-{model}"),
                        color: color.clone(),
                        stock: self.stock,
                        price: 29_900,
                    });
                }
            }
        }
        InMemoryStore::with_products(self.latency, products)
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Workload {
    pub concurrency: usize,
    #[serde(flatten)]
    pub payload: Payload,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Payload {
    /// Lists the models of one brand, or of all brands.
    Models { brand: Option<String> },
    /// Lists the colors of one model.
    Colors { model: String },
    /// Reads the dashboard.
    Dashboard { window: StatsWindow },
    /// Sells units of random products.
    Sales { quantity: u32 },
    /// Resets the stock of random products.
    Restock { stock: u32 },
}

pub async fn process_payload(
    service: &CatalogService,
    payload: &Payload,
    product_count: u64,
) -> Result<(), CatalogError> {
    match payload {
        Payload::Models { brand } => {
            service.phone_models(brand.as_deref()).await?;
        }
        Payload::Colors { model } => {
            service.colors(model).await?;
        }
        Payload::Dashboard { window } => {
            service.dashboard(*window).await?;
        }
        Payload::Sales { quantity } => {
            let product = random_product(product_count);
            service.record_sale(product, *quantity).await?;
        }
        Payload::Restock { stock } => {
            let product = random_product(product_count);
            service.update_stock(product, *stock).await?;
        }
    }
    Ok(())
}

fn random_product(product_count: u64) -> ProductId {
    ProductId(rand::rng().random_range(1..=product_count.max(1)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_workloads() {
        let yaml = r#"
            store:
              latency: 5ms
              brands: 2
            workloads:
              - concurrency: 50
                models: {}
              - concurrency: 20
                colors:
                  model: Model0-1
              - concurrency: 4
                dashboard:
                  window: today
              - concurrency: 1
                sales:
                  quantity: 2
        "#;
        let config: WorkloadsConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.store.latency, Duration::from_millis(5));
        assert_eq!(config.store.models_per_brand, 10);
        assert_eq!(config.store.product_count(), 60);

        assert_eq!(config.workloads.len(), 4);
        assert_eq!(config.workloads[0].concurrency, 50);
        assert!(matches!(
            config.workloads[0].payload,
            Payload::Models { brand: None }
        ));
        assert!(matches!(
            &config.workloads[1].payload,
            Payload::Colors { model } if model == "Model0-1"
        ));
        assert!(matches!(
            config.workloads[2].payload,
            Payload::Dashboard {
                window: StatsWindow::Today
            }
        ));
    }

    #[tokio::test]
    async fn test_generated_store() {
        use stocktaker_service::store::InventoryStore;

        let config = StoreConfig {
            latency: Duration::ZERO,
            brands: 2,
            models_per_brand: 3,
            ..Default::default()
        };
        let store = config.build();

        let colors = store.distinct_colors("Model1-2").await.unwrap();
        assert_eq!(colors, ["black", "blue", "white"]);
        let summary = store.dashboard_summary(StatsWindow::All).await.unwrap();
        assert_eq!(summary.products, config.product_count());
    }
}
