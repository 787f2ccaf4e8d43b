//! # Seed Data Generator
//!
//! Populates a development database with partners, products, a default
//! commission config and discount limits.
//!
//! ## Usage
//! ```bash
//! cargo run -p merchflow-db --bin seed
//!
//! # Specify database path
//! cargo run -p merchflow-db --bin seed -- --db ./data/merchflow.db
//! ```
//!
//! ## Generated Data
//! - 3 partners, each producing one or two categories
//! - One product per (partner, design) with three quantity tiers
//! - Default commission config "standard" v1: 15% / 12% / 8%
//! - Global discount limit 1-50%, apparel 5-30%

use chrono::Utc;
use std::env;

use merchflow_core::commission::{CommissionConfig, CommissionTier};
use merchflow_core::discount::DiscountLimit;
use merchflow_core::money::{Money, Rate};
use merchflow_core::types::{PricingTier, Product};
use merchflow_db::repository::{new_id, Partner};
use merchflow_db::{Database, DbConfig};

/// (partner id, name, [(category, priority)])
const PARTNERS: &[(&str, &str, &[(&str, i64)])] = &[
    ("partner-inkwell", "Inkwell Prints", &[("apparel", 0), ("bags", 1)]),
    ("partner-kiln", "Kiln & Co", &[("drinkware", 0)]),
    ("partner-loom", "Loom Works", &[("apparel", 1), ("bags", 0)]),
];

/// (partner id, category, design, base price in rupees, tracked stock)
const PRODUCTS: &[(&str, &str, &str, i64, Option<i64>)] = &[
    ("partner-inkwell", "apparel", "Crew Neck Tee", 450, None),
    ("partner-inkwell", "apparel", "Pullover Hoodie", 1200, None),
    ("partner-inkwell", "bags", "Canvas Tote", 350, Some(500)),
    ("partner-kiln", "drinkware", "Ceramic Mug", 300, Some(1000)),
    ("partner-kiln", "drinkware", "Steel Bottle", 650, Some(300)),
    ("partner-loom", "apparel", "Polo Shirt", 700, None),
    ("partner-loom", "bags", "Drawstring Bag", 200, Some(800)),
];

fn tax_category(category: &str) -> &'static str {
    match category {
        "apparel" => "6109",
        "bags" => "4202",
        _ => "6912",
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let mut db_path = String::from("./merchflow_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("MerchFlow Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./merchflow_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("MerchFlow Seed Data Generator");
    println!("=============================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected, migrations applied");

    if db.commission().default_active().await?.is_some() {
        println!("⚠ Database already has a default commission config");
        println!("  Skipping seed to avoid duplicates.");
        return Ok(());
    }

    let now = Utc::now();

    for (id, name, categories) in PARTNERS {
        let partner = Partner {
            id: id.to_string(),
            name: name.to_string(),
            is_active: true,
            created_at: now,
        };
        let categories: Vec<(String, i64)> = categories.iter().map(|(c, p)| (c.to_string(), *p)).collect();
        db.partners().upsert(&partner, &categories).await?;
    }
    println!("✓ {} partners", PARTNERS.len());

    for (index, (partner_id, category, design, base, stock)) in PRODUCTS.iter().enumerate() {
        let base_price = Money::from_major(*base);
        let product = Product {
            id: format!("prod-{:03}", index + 1),
            name: design.to_string(),
            partner_id: partner_id.to_string(),
            category: category.to_string(),
            tax_category: tax_category(category).to_string(),
            base_price,
            // 1-24 at base, 25-99 at 90%, 100+ at 80%
            tiers: vec![
                PricingTier::new(1, Some(24), base_price),
                PricingTier::new(25, Some(99), Money::from_major(base * 9 / 10)),
                PricingTier::new(100, None, Money::from_major(base * 8 / 10)),
            ],
            is_active: true,
            track_inventory: stock.is_some(),
            stock: *stock,
            updated_at: now,
        };
        db.catalog().upsert(&product).await?;
    }
    println!("✓ {} products", PRODUCTS.len());

    let config = CommissionConfig {
        id: new_id(),
        name: "standard".to_string(),
        version: 1,
        is_default: false,
        is_active: true,
        tiers: vec![
            CommissionTier::new(Money::zero(), Some(Money::from_major(5000)), Rate::from_percent(15), 1),
            CommissionTier::new(Money::from_major(5001), Some(Money::from_major(25000)), Rate::from_percent(12), 2),
            CommissionTier::new(Money::from_major(25001), None, Rate::from_percent(8), 3),
        ],
        created_at: now,
        updated_at: now,
    };
    let mut tx = db.begin_write().await?;
    db.commission().insert_tx(&mut tx, &config).await?;
    db.commission().set_default_tx(&mut tx, &config.id).await?;
    tx.commit().await?;
    println!("✓ Default commission config '{}' v{}", config.name, config.version);

    db.discounts()
        .upsert_limit(&DiscountLimit {
            category: None,
            min: Rate::from_percent(1),
            max: Rate::from_percent(50),
        })
        .await?;
    db.discounts()
        .upsert_limit(&DiscountLimit {
            category: Some("apparel".to_string()),
            min: Rate::from_percent(5),
            max: Rate::from_percent(30),
        })
        .await?;
    println!("✓ Discount limits");

    println!();
    println!("✓ Seed complete!");
    Ok(())
}
