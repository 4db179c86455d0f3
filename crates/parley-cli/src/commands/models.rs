//! Models command - list what the daemon has installed.

use parley_core::{Model, ModelCatalog, RelayConfig};

pub(crate) async fn run(relay: &RelayConfig) -> miette::Result<()> {
    let catalog = ModelCatalog::from_config(relay);
    // select_model prints the troubleshooting or pull hint on failure.
    super::select_model(relay, &catalog, None).await?;

    println!("Installed models:");
    for model in catalog.list().iter() {
        println!("  - {}", describe(model));
    }

    Ok(())
}

/// One line per model: id, friendly name and whatever details are known.
pub(crate) fn describe(model: &Model) -> String {
    let details: Vec<String> = [
        model.parameter_size.clone(),
        model.family.clone(),
        model.size_bytes.map(super::format_size),
    ]
    .into_iter()
    .flatten()
    .collect();

    if details.is_empty() {
        format!("{:<28} {}", model.id, model.display_name)
    } else {
        format!(
            "{:<28} {} ({})",
            model.id,
            model.display_name,
            details.join(", ")
        )
    }
}
