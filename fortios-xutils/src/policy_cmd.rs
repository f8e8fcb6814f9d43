use anyhow::{Context, Result};
use fortios_xutils::address::{RangeExpansion, ResolveOptions};
use fortios_xutils::dataset::Dataset;
use fortios_xutils::policy::{addresses_matching, PolicySet};
use fortios_xutils::report::{
    render_address_matches, render_issues, render_policies, render_table,
};
use fortios_xutils::settings::Settings;
use serde_json::{json, Value};

use crate::cli::{OutputFormat, PolicySaveArgs, PolicySearchArgs, RangeExpansionArg};
use crate::path_guard;

/// Resolver options from the settings, with the command-line mode applied.
pub fn resolve_options(settings: &Settings, mode: Option<RangeExpansionArg>) -> ResolveOptions {
    let mut options = settings.resolve;
    if let Some(mode) = mode {
        options.range_expansion = match mode {
            RangeExpansionArg::Cidr => RangeExpansion::Cidr,
            RangeExpansionArg::Hosts => RangeExpansion::Hosts,
        };
    }
    options
}

pub fn run_policy_save(args: PolicySaveArgs, settings: &Settings) -> Result<()> {
    path_guard::ensure_output_not_input(&args.output, std::slice::from_ref(&args.file))?;
    let options = resolve_options(settings, args.range_expansion);

    let set = PolicySet::load(&args.file, options)
        .with_context(|| format!("failed to load policies from {}", args.file.display()))?;
    set.save(&args.output)
        .with_context(|| format!("failed to write {}", args.output.display()))?;

    println!(
        "device={} policies={} issues={} output={}",
        set.device,
        set.policies.len(),
        set.issue_count(),
        args.output.display()
    );
    if args.issues && set.issue_count() > 0 {
        println!("{}", render_issues(&set));
    }
    Ok(())
}

pub fn run_policy_search(args: PolicySearchArgs, settings: &Settings) -> Result<()> {
    let options = resolve_options(settings, args.range_expansion);
    let set = PolicySet::load(&args.file, options)
        .with_context(|| format!("failed to load policies from {}", args.file.display()))?;
    let policies = set.policies_matching(args.ip);

    let addresses = if args.addresses {
        let dataset = Dataset::load(&args.file).with_context(|| {
            format!(
                "address search needs a configuration or dataset input, not {}",
                args.file.display()
            )
        })?;
        Some(addresses_matching(&dataset, args.ip, options))
    } else {
        None
    };

    match args.format {
        OutputFormat::Text => {
            if policies.is_empty() {
                println!("no policy covers {}", args.ip);
            } else if args.table {
                let rows: Vec<Value> =
                    policies.iter().map(|policy| policy.to_row(&set.device)).collect();
                println!("{}", render_table(&rows));
            } else {
                println!("{}", render_policies(&policies));
            }
            if let Some(addresses) = &addresses {
                println!();
                println!("Address objects");
                println!("{}", render_address_matches(addresses));
            }
        }
        OutputFormat::Json => {
            let rows: Vec<Value> = if args.table {
                policies.iter().map(|policy| policy.to_row(&set.device)).collect()
            } else {
                policies
                    .iter()
                    .map(|policy| serde_json::to_value(policy))
                    .collect::<Result<_, _>>()?
            };
            let mut out = json!({ "device": set.device, "ip": args.ip, "policies": rows });
            if let Some(addresses) = addresses {
                out["addresses"] = serde_json::to_value(addresses)?;
            }
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
