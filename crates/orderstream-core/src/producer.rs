use std::sync::Arc;

use chrono::Utc;
use rand::Rng;
use tracing::debug;

use crate::error::ProduceError;
use crate::item::WorkItem;
use crate::store::LogStore;

const ID_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const ID_LENGTH: usize = 10;

const FIRST_NAMES: &[&str] = &[
    "Ada", "Alan", "Barbara", "Dennis", "Edsger", "Frances", "Grace", "Ken", "Margaret", "Niklaus",
];
const LAST_NAMES: &[&str] = &[
    "Allen", "Dijkstra", "Hamilton", "Hopper", "Liskov", "Lovelace", "Ritchie", "Thompson",
    "Turing", "Wirth",
];
const ADJECTIVES: &[&str] = &[
    "Ergonomic", "Handcrafted", "Incredible", "Practical", "Refined", "Rustic", "Sleek",
    "Tasty", "Unbranded",
];
const MATERIALS: &[&str] = &[
    "Bronze", "Concrete", "Cotton", "Granite", "Metal", "Plastic", "Steel", "Wooden",
];
const PRODUCTS: &[&str] = &[
    "Bike", "Chair", "Computer", "Gloves", "Keyboard", "Lamp", "Shoes", "Table", "Towels",
];

/// Appends orders to a partition, capping it at roughly `max_length`.
pub struct Producer {
    log: Arc<dyn LogStore>,
    max_length: usize,
}

impl Producer {
    pub fn new(log: Arc<dyn LogStore>, max_length: usize) -> Self {
        Self { log, max_length }
    }

    /// Append one item. Returns the broker-assigned entry id.
    pub async fn append(&self, partition: &str, item: &WorkItem) -> Result<String, ProduceError> {
        let fields = item.to_fields()?;
        let entry_id = self.log.append(partition, self.max_length, &fields).await?;
        debug!(%partition, %entry_id, item_id = %item.id, "appended order");
        Ok(entry_id)
    }
}

fn pick<R: Rng + ?Sized>(rng: &mut R, values: &[&'static str]) -> &'static str {
    values[rng.random_range(0..values.len())]
}

/// Random 10-character lowercase alphanumeric id.
pub fn random_id() -> String {
    let mut rng = rand::rng();
    (0..ID_LENGTH)
        .map(|_| ID_ALPHABET[rng.random_range(0..ID_ALPHABET.len())] as char)
        .collect()
}

/// Synthetic order with a random customer, product and amount in `1..=1000`,
/// timestamped now.
pub fn sample_item() -> WorkItem {
    let mut rng = rand::rng();
    let customer = format!("{} {}", pick(&mut rng, FIRST_NAMES), pick(&mut rng, LAST_NAMES));
    let name = format!(
        "{} {} {}",
        pick(&mut rng, ADJECTIVES),
        pick(&mut rng, MATERIALS),
        pick(&mut rng, PRODUCTS)
    );
    let amount = rng.random_range(1..=1000);
    WorkItem {
        id: random_id(),
        customer,
        name,
        amount,
        timestamp: Utc::now(),
    }
}
