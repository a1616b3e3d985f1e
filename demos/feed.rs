//! Prints the public find feed, optionally filtered, and looks up a species.
//!
//! ```sh
//! MYCOLOG_API_URL=http://localhost:3000 cargo run --example feed -- chanterelle
//! ```
//!
//! Set `MYCOLOG_USER` and `MYCOLOG_PASSWORD` to also list your own finds.

use std::sync::Arc;

use color_eyre::eyre::{Result, eyre};
use mycolog::prelude::*;
use mycolog::resources::{self, FindFilter};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let species = std::env::args().nth(1);

    let config = ClientConfig::from_env()?;
    let session = Arc::new(Session::new());
    let client = ApiClient::connect(&config, session.clone())?;

    if let (Ok(user), Ok(password)) = (
        std::env::var("MYCOLOG_USER"),
        std::env::var("MYCOLOG_PASSWORD"),
    ) {
        session
            .login(client.transport(), &Credentials::new(user, password))
            .await?;

        let mine = resources::my_finds(&client).settled().await;
        println!("You have logged {} finds", mine.data.map_or(0, |f| f.len()));
    }

    let feed = resources::all_finds(&client).settled().await;
    if let Some(err) = feed.error {
        return Err(eyre!("could not load feed: {err}"));
    }
    let finds = feed.data.unwrap_or_default();

    let filter = FindFilter {
        species: species.clone(),
        ..FindFilter::default()
    };
    for find in filter.markers(&finds) {
        let (lon, lat) = find.coordinates().unwrap_or_default();
        println!(
            "#{:<5} {:<28} {:>10} ({lat:.3}, {lon:.3})",
            find.id,
            find.species,
            find.date_found.map(|d| d.to_string()).unwrap_or_default(),
        );
    }

    if let Some(name) = species {
        match resources::species_facts(&client, &name).await {
            Ok(Some(facts)) => {
                println!("\n{name}: {}", facts.safety().label());
                if !facts.deadly_lookalikes.is_empty() {
                    println!("Deadly lookalikes: {}", facts.deadly_lookalikes.join(", "));
                }
            }
            Ok(None) => {}
            Err(err) => println!("\nNo facts for {name}: {err}"),
        }
    }

    Ok(())
}
