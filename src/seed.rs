use crate::engine::{Engine, EngineError};
use crate::model::TypeId;

/// Reference catalog: type id, type name, instance name prefix, instance count.
const CATALOG: &[(TypeId, &str, &str, u32)] = &[
    (1, "Drop-in skrivbord", "Drop-in skrivbord", 15),
    (2, "Mötesrum", "Mötesrum", 4),
    (3, "VR headset", "VR Headset", 4),
    (4, "AI server", "AI Server", 1),
];

fn instance_name(prefix: &str, n: u32, count: u32) -> String {
    if count == 1 { prefix.to_string() } else { format!("{prefix} {n}") }
}

/// Populate an empty store with the reference catalog.
///
/// Returns `false` without touching anything if any resource type already
/// exists, which is the normal case after a restart.
pub async fn seed_catalog(engine: &Engine) -> Result<bool, EngineError> {
    if engine.has_catalog() {
        tracing::debug!("catalog present, skipping seed");
        return Ok(false);
    }

    let mut next_instance = 1;
    for &(type_id, type_name, prefix, count) in CATALOG {
        engine.create_resource_type(type_id, type_name.to_string()).await?;
        for n in 1..=count {
            engine
                .create_instance(next_instance, type_id, instance_name(prefix, n, count), true)
                .await?;
            next_instance += 1;
        }
    }
    tracing::info!("seeded {} resource types, {} resources", CATALOG.len(), next_instance - 1);
    Ok(true)
}
