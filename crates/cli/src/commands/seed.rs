use crate::commands::{load_config, runtime, CommandResult, Failure};
use approvey_core::NcrMailboxes;
use approvey_db::{connect_with_config, migrations, DemoSeedDataset, SqlProposalStore};

pub fn run() -> CommandResult {
    let config = match load_config("seed") {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime("seed") {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };
    let mailboxes = NcrMailboxes::from(&config.ncr);

    let result = runtime.block_on(async {
        let pool = connect_with_config(&config.database)
            .await
            .map_err(|error| ("db_connectivity", error.to_string(), 4u8))?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;

        let store = SqlProposalStore::new(pool.clone());
        let seeded = DemoSeedDataset::load(&store, &mailboxes)
            .await
            .map_err(|error| ("seed_execution", error.to_string(), 6u8))?;
        let verification = DemoSeedDataset::verify(&store, &mailboxes)
            .await
            .map_err(|error| ("seed_verification", error.to_string(), 6u8))?;
        pool.close().await;

        if !verification.all_present {
            let failed = verification
                .checks
                .iter()
                .filter_map(|(check, passed)| (!passed).then_some(*check))
                .collect::<Vec<_>>()
                .join(", ");
            return Err((
                "seed_verification",
                format!("seeded proposals missing or incomplete: {failed}"),
                6u8,
            ));
        }

        let lines = seeded
            .proposals
            .iter()
            .map(|seed| {
                let state = if seed.inserted { "inserted" } else { "already present" };
                format!("{}: {} ({}; {state})", seed.flow_type, seed.proposal_id, seed.description)
            })
            .collect::<Vec<_>>();
        Ok::<_, Failure>(lines)
    });

    match result {
        Ok(lines) => CommandResult::success(
            "seed",
            format!("demo proposals ready: {}", lines.join(" | ")),
        ),
        Err((error_class, message, exit_code)) => {
            CommandResult::failure("seed", error_class, message, exit_code)
        }
    }
}
