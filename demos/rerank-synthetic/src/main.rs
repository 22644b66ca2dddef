//! Rerank a synthetic target/decoy dataset and write the report as JSON
use std::{fs::File, io::BufWriter};

use clap::Parser;
use log::info;
use mzrerank::prelude::*;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256PlusPlus;

/// The command line interface arguments
#[derive(Debug, Parser)]
struct Cli {
    /// The number of proteins to generate, a third of them are decoys
    #[arg(long, default_value_t = 300)]
    proteins: usize,
    /// The number of features per PSM, only the first two carry signal
    #[arg(long, default_value_t = 6)]
    features: usize,
    /// The separation between the target and decoy feature distributions
    #[arg(long, default_value_t = 1.0)]
    separation: f64,
    /// The seed for the generated data
    #[arg(long, default_value_t = 1)]
    data_seed: u64,
    /// The level to train at (`psm`/`peptide`/`protein`)
    #[arg(short, long, default_value_t = String::from("psm"))]
    level: String,
    /// A JSON file with the training parameters, missing fields take their default value
    #[arg(short, long)]
    config: Option<String>,
    /// The path to write the JSON report to
    #[arg(short, long)]
    out_path: Option<String>,
}

/// Generate proteins with one to three peptides of one to three PSMs each. Some target peptides
/// are shared by two proteins.
fn generate(args: &Cli) -> Result<InMemoryFeatureStore, RerankError> {
    let mut rng = Xoshiro256PlusPlus::seed_from_u64(args.data_seed);
    let mut builder = FeatureStoreBuilder::new(args.features);
    let labels: Vec<Label> = (0..args.proteins)
        .map(|index| {
            if index % 3 == 0 {
                Label::Decoy
            } else {
                Label::Target
            }
        })
        .collect();
    let proteins: Vec<usize> = labels
        .iter()
        .map(|label| builder.add_protein(*label, rng.random_range(4..8)))
        .collect();
    let mut features = vec![0.0; args.features];
    for (index, label) in labels.iter().enumerate() {
        for peptide_index in 0..rng.random_range(1..=3) {
            let partner = index + 3;
            let peptide = if peptide_index == 0
                && label.is_target()
                && partner < proteins.len()
                && rng.random_bool(0.1)
            {
                builder.add_peptide(&[proteins[index], proteins[partner]])?
            } else {
                builder.add_peptide(&[proteins[index]])?
            };
            // Decoys and incorrect targets share one distribution
            let correct = label.is_target() && rng.random_bool(0.7);
            for _ in 0..rng.random_range(1..=3) {
                for (feature, value) in features.iter_mut().enumerate() {
                    let noise = rng.random::<f64>() - 0.5;
                    *value = if correct && feature < 2 {
                        args.separation + noise
                    } else {
                        noise
                    };
                }
                builder.add_psm(peptide, &features, *label)?;
            }
        }
    }
    let mut store = builder.build()?;
    store.normalise();
    Ok(store)
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Cli::parse();

    let level = match args.level.to_ascii_lowercase().as_str() {
        "psm" => Level::Psm,
        "peptide" => Level::Peptide,
        "protein" => Level::Protein,
        other => panic!("Invalid level '{other}', use psm, peptide, or protein"),
    };
    let parameters: RerankParameters =
        args.config
            .as_ref()
            .map_or_else(RerankParameters::default, |path| {
                serde_json::from_reader(File::open(path).expect("Could not open the config file"))
                    .expect("Invalid config file")
            });

    let store = match generate(&args) {
        Ok(store) => store,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };
    info!(
        "Generated {} PSMs, {} peptides, {} proteins",
        store.num_psms(),
        store.num_peptides(),
        store.num_proteins()
    );

    let report = match Trainer::new(&store, parameters).and_then(|mut trainer| trainer.train(level))
    {
        Ok(report) => report,
        Err(error) => {
            eprintln!("{error}");
            std::process::exit(1);
        }
    };
    println!(
        "{} {level}s accepted at FDR {}",
        report.accepted, report.selection_fdr
    );

    if let Some(path) = &args.out_path {
        let out_file =
            BufWriter::new(File::create(path).expect("Could not create the report file"));
        serde_json::to_writer_pretty(out_file, &report).expect("Could not write the report");
    }
}
