mod demo;

use anyhow::Context;
use apievo::config::ConfigManager;
use apievo::engines::search::{ConsoleProgressCallback, Mio};
use log::info;

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let config_path = std::env::args().nth(1);
    let manager = ConfigManager::new();
    manager
        .load_layered(config_path.as_deref())
        .context("loading configuration")?;
    let config = manager.get();
    info!("Loaded configuration: {:?}", config);

    let cluster = demo::cluster();
    let sampler = demo::PetStoreSampler::new(cluster.clone(), config.resource.max_test_size);
    let fitness = demo::PetStoreFitness::new();

    let mut mio = Mio::new(config, sampler, fitness)?
        .with_structure_mutation(Box::new(cluster), Box::new(demo::dependencies()));
    let solution = mio.run(ConsoleProgressCallback::default())?;

    let stats = mio.statistics();
    println!(
        "Generated {} tests with {} actions, covering {} targets",
        solution.size(),
        solution.number_of_actions(),
        solution.covered_targets.len()
    );
    if let Some(seeded) = stats.seeded_covered_targets {
        println!("Seeded tests alone covered {} targets", seeded);
    }
    println!("{}", serde_json::to_string_pretty(stats)?);
    Ok(())
}
