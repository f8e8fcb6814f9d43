use anyhow::{Context, Result};
use fortios_xutils::dataset::Dataset;
use fortios_xutils::paths::{find_paths, PathOptions};
use fortios_xutils::policy::PolicySet;
use fortios_xutils::report::{render_graph_summary, render_paths};
use fortios_xutils::settings::Settings;
use fortios_xutils::topology::TopologyGraph;

use crate::cli::{NetworkCollectArgs, NetworkComposeArgs, NetworkFindPathsArgs, OutputFormat};
use crate::path_guard;
use crate::policy_cmd::resolve_options;

pub fn run_collect(args: NetworkCollectArgs, settings: &Settings) -> Result<()> {
    path_guard::ensure_output_not_input(&args.output, std::slice::from_ref(&args.file))?;
    let options = resolve_options(settings, args.range_expansion);

    let dataset = Dataset::load(&args.file)
        .with_context(|| format!("failed to parse {}", args.file.display()))?;
    let policies = PolicySet::from_dataset(&dataset, options);
    let (graph, stats) = TopologyGraph::build(&dataset, &policies);
    graph
        .save(&args.output)
        .with_context(|| format!("failed to write graph {}", args.output.display()))?;

    println!("device={} output={}", policies.device, args.output.display());
    println!("{}", render_graph_summary(&graph, Some(&stats)));
    Ok(())
}

pub fn run_compose(args: NetworkComposeArgs) -> Result<()> {
    path_guard::ensure_output_not_input(&args.output, &args.graphs)?;

    let mut graphs = Vec::with_capacity(args.graphs.len());
    for path in &args.graphs {
        let graph = TopologyGraph::load(path)
            .with_context(|| format!("failed to load graph {}", path.display()))?;
        graphs.push(graph);
    }
    let composed = TopologyGraph::compose(&graphs);
    composed
        .save(&args.output)
        .with_context(|| format!("failed to write graph {}", args.output.display()))?;

    println!("graphs={} output={}", graphs.len(), args.output.display());
    println!("{}", render_graph_summary(&composed, None));
    Ok(())
}

pub fn run_find_paths(args: NetworkFindPathsArgs, settings: &Settings) -> Result<()> {
    let graph = TopologyGraph::load(&args.graph)
        .with_context(|| format!("failed to load graph {}", args.graph.display()))?;
    let options = PathOptions {
        max_hops: args.max_hops.unwrap_or(settings.paths.max_hops),
    };

    let paths = find_paths(&graph, args.src, args.dst, options);
    match args.format {
        OutputFormat::Text => println!("{}", render_paths(&paths)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&paths)?),
    }
    Ok(())
}
