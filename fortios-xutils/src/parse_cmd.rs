use std::path::PathBuf;

use anyhow::{Context, Result};
use config_block_core::parse_file;
use fortios_xutils::dataset::{Dataset, SectionSelection};
use fortios_xutils::inspect::render_tree;
use fortios_xutils::report::render_dataset_summary;
use fortios_xutils::settings::Settings;
use fortios_xutils::snapshot::{self, SnapshotKind};
use serde::Serialize;

use crate::cli::{InspectArgs, OutputFormat, ParseArgs};

/// File name of the dataset snapshot written next to the JSON files.
const DATASET_SNAPSHOT: &str = "dataset.gz";

#[derive(Debug, Serialize)]
struct ParsedDevice {
    source: PathBuf,
    hostname: Option<String>,
    vdoms: Vec<String>,
    sections: usize,
    outdir: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    snapshot: Option<PathBuf>,
}

pub fn run_parse(args: ParseArgs, settings: &Settings) -> Result<()> {
    let outdir = args
        .outdir
        .unwrap_or_else(|| settings.parse.outdir.clone());
    let patterns = if args.sections.is_empty() {
        settings.parse.sections.as_slice()
    } else {
        args.sections.as_slice()
    };
    let selection = SectionSelection::new(patterns).context("invalid section selection")?;

    let mut devices = Vec::new();
    for file in &args.files {
        let dataset = Dataset::load(file)
            .with_context(|| format!("failed to parse {}", file.display()))?;
        let dir = dataset
            .dump(&outdir, &selection)
            .with_context(|| format!("failed to write parsed output of {}", file.display()))?;

        let snapshot = if args.snapshot {
            let path = dir.join(DATASET_SNAPSHOT);
            snapshot::save(&path, SnapshotKind::Dataset, &dataset)
                .with_context(|| format!("failed to write snapshot {}", path.display()))?;
            Some(path)
        } else {
            None
        };

        if let OutputFormat::Text = args.format {
            println!("{} -> {}", file.display(), dir.display());
            println!("{}", render_dataset_summary(&dataset));
        }
        devices.push(ParsedDevice {
            source: file.clone(),
            hostname: dataset.metadata.hostname.clone(),
            vdoms: dataset.metadata.vdoms.clone(),
            sections: dataset.sections().len(),
            outdir: dir,
            snapshot,
        });
    }

    if let OutputFormat::Json = args.format {
        println!("{}", serde_json::to_string_pretty(&devices)?);
    }
    Ok(())
}

pub fn run_inspect(args: InspectArgs) -> Result<()> {
    let doc = parse_file(&args.file)
        .with_context(|| format!("failed to parse {}", args.file.display()))?;

    let roots = match &args.section {
        Some(section) => vec![doc
            .find_root(section)
            .with_context(|| format!("section '{}' not found", section))?],
        None => doc.roots().to_vec(),
    };

    for line in &doc.header {
        println!("{line}");
    }
    print!("{}", render_tree(&doc, &roots, args.depth));
    Ok(())
}
