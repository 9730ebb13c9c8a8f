//! # Seed Data Generator
//!
//! Populates the database with demo farm listings for development.
//!
//! ## Usage
//! ```bash
//! # Seed ./doko_dev.db
//! cargo run -p doko-db --bin seed
//!
//! # Specify database path
//! cargo run -p doko-db --bin seed -- --db ./data/doko.db
//! ```
//!
//! ## Generated Listings
//! Three demo farmers, each with a handful of seasonal products. Stock
//! levels vary from sold-out to plenty so the catalog shows both states.

use chrono::Utc;
use doko_core::validation::{validate_price_paisa, validate_product_name, validate_unit};
use doko_core::Product;
use doko_db::{Database, DbConfig};
use std::env;
use uuid::Uuid;

/// (seller id, [(name, unit, price in paisa, stock)])
const FARMS: &[(&str, &[(&str, &str, i64, i64)])] = &[
    (
        "farmer-dhading",
        &[
            ("Organic Tomatoes", "kg", 8_000, 120),
            ("Green Chillies", "kg", 15_000, 30),
            ("Cauliflower", "piece", 6_000, 45),
            ("Rayo Saag", "bundle", 3_000, 0),
        ],
    ),
    (
        "farmer-ilam",
        &[
            ("Orthodox Black Tea", "250g", 45_000, 60),
            ("Cardamom", "kg", 250_000, 8),
            ("Akabare Chilli Pickle", "jar", 35_000, 25),
        ],
    ),
    (
        "farmer-jumla",
        &[
            ("Marsi Red Rice", "kg", 22_000, 200),
            ("Jumla Apples", "crate", 180_000, 12),
            ("Buckwheat Flour", "kg", 18_000, 0),
        ],
    ),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    let mut db_path = "./doko_dev.db".to_string();

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
                println!("DOKO Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./doko_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("DOKO Seed Data Generator");
    println!("========================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;
    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let mut generated = 0;
    for (seller_id, listings) in FARMS {
        if !db.products().list_by_seller(seller_id).await?.is_empty() {
            println!("⚠ {} already has listings, skipping", seller_id);
            continue;
        }

        for (name, unit, price_paisa, stock) in listings.iter() {
            validate_product_name(name)?;
            validate_unit(unit)?;
            validate_price_paisa(*price_paisa)?;

            let product = listing(seller_id, name, unit, *price_paisa, *stock);
            if let Err(e) = db.products().insert(&product).await {
                eprintln!("Failed to insert {}: {}", name, e);
                continue;
            }
            generated += 1;
        }
    }

    let available = db.products().list_available(100).await?;
    println!();
    println!("✓ Inserted {} listings ({} in stock)", generated, available.len());
    println!("✓ Seed complete!");

    db.close().await;
    Ok(())
}

fn listing(seller_id: &str, name: &str, unit: &str, price_paisa: i64, stock: i64) -> Product {
    let now = Utc::now();
    Product {
        id: Uuid::new_v4().to_string(),
        seller_id: seller_id.to_string(),
        name: name.to_string(),
        description: None,
        unit: unit.to_string(),
        price_paisa,
        stock_quantity: stock,
        is_available: stock > 0,
        is_active: true,
        created_at: now,
        updated_at: now,
    }
}
