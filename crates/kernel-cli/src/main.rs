use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

use contracts::{Action, ActionPayload, RunConfig, ScenarioSetup, Stakeholder, TrustTopology};
use kernel_api::{serve, EngineApi};

fn print_usage() {
    println!("kernel-cli <command>");
    println!("commands:");
    println!("  status");
    println!("  step [n]");
    println!("  run-to <round>");
    println!("  influence");
    println!("  serve [addr]");
    println!("    default addr: 127.0.0.1:8080");
    println!("  simulate <run_id> [rounds] [sqlite_path]");
    println!("    runs the demo scenario to a terminal outcome and persists to sqlite");
}

/// A small fixed roster: a skeptical budget holder, a supportive seller, a
/// neutral sponsor, and the proposer lobbying them.
fn demo_setup(run_id: &str) -> ScenarioSetup {
    ScenarioSetup {
        config: RunConfig {
            run_id: run_id.to_string(),
            ..RunConfig::default()
        },
        stakeholders: vec![
            Stakeholder::new("sh:finance", "Finance Manager", "finance"),
            Stakeholder::new("sh:sales", "Sales Manager", "sales"),
            Stakeholder::new("sh:sponsor", "Executive Sponsor", "sponsor"),
            Stakeholder::new("sh:proposer", "Proposer", "proposer"),
        ],
        topology: TrustTopology::Explicit {
            rows: vec![
                vec![0.70, 0.10, 0.15, 0.05],
                vec![0.20, 0.50, 0.20, 0.10],
                vec![0.25, 0.25, 0.40, 0.10],
                vec![0.10, 0.10, 0.20, 0.60],
            ],
        },
        seed_opinions: BTreeMap::from([
            ("sh:finance".to_string(), 0.25),
            ("sh:sales".to_string(), 0.70),
            ("sh:sponsor".to_string(), 0.55),
            ("sh:proposer".to_string(), 0.95),
        ]),
    }
}

fn demo_actions(run_id: &str) -> Vec<Action> {
    vec![
        Action::new(
            "act:socialize-finance",
            run_id,
            0,
            "sh:proposer",
            1,
            ActionPayload::Socialize {
                target_id: "sh:finance".to_string(),
                delta: 0.3,
            },
        ),
        Action::new(
            "act:evidence-finance",
            run_id,
            0,
            "sh:proposer",
            1,
            ActionPayload::PresentEvidence {
                target_id: "sh:finance".to_string(),
                delta: 0.2,
            },
        ),
    ]
}

fn parse_u32(value: Option<&String>, label: &str) -> Result<u32, String> {
    let raw = value.ok_or_else(|| format!("missing {}", label))?;
    raw.parse::<u32>()
        .map_err(|_| format!("invalid {}: {}", label, raw))
}

fn parse_socket_addr(value: Option<&String>) -> Result<SocketAddr, String> {
    let raw = value.map(String::as_str).unwrap_or("127.0.0.1:8080");
    raw.parse::<SocketAddr>()
        .map_err(|_| format!("invalid addr: {raw}"))
}

fn default_sqlite_path() -> String {
    std::env::var("CONSENSUS_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "consensus_runs.sqlite".to_string())
}

fn parse_sqlite_path(value: Option<&String>) -> String {
    value
        .map(String::to_string)
        .filter(|path| !path.trim().is_empty())
        .unwrap_or_else(default_sqlite_path)
}

fn run_simulation(args: &[String]) -> Result<(), String> {
    let run_id = args
        .get(2)
        .cloned()
        .ok_or_else(|| "missing run_id".to_string())?;
    let max_rounds = args
        .get(3)
        .map(|value| {
            value
                .parse::<u32>()
                .map_err(|_| format!("invalid rounds: {value}"))
        })
        .transpose()?;
    let sqlite_path = parse_sqlite_path(args.get(4));

    let mut setup = demo_setup(&run_id);
    if let Some(rounds) = max_rounds {
        setup.config.max_rounds = rounds.max(1);
    }

    let mut api =
        EngineApi::from_setup(setup).map_err(|err| format!("failed to build scenario: {err}"))?;
    api.attach_sqlite_store(PathBuf::from(&sqlite_path))
        .map_err(|err| format!("failed to attach sqlite store: {err}"))?;
    api.initialize_run_storage(true)
        .map_err(|err| format!("failed to initialize run storage: {err}"))?;

    for action in demo_actions(&run_id) {
        api.queue_action(action)
            .map_err(|err| format!("failed to queue action: {err}"))?;
    }

    let (status, outcome) = api
        .run_to_completion()
        .map_err(|err| format!("simulation failed: {err}"))?;

    if let Some(error) = api.last_persistence_error() {
        return Err(format!("persistence error after simulation: {error}"));
    }

    println!(
        "simulated run_id={} rounds={}/{} outcome={} sqlite={}",
        run_id, status.current_round, status.max_rounds, outcome, sqlite_path
    );
    Ok(())
}

fn print_influence(api: &EngineApi) {
    let report = api.influence_report();
    if report.fragmented {
        println!("network is fragmented into {} cliques", report.cliques.len());
        for (index, clique) in report.cliques.iter().enumerate() {
            println!("  clique {}: {}", index + 1, clique.join(", "));
        }
    }
    println!("ranking (method={:?}):", report.method);
    for entry in &report.ranking {
        println!("  {} score={:.4}", entry.stakeholder_id, entry.score);
    }
    if let Some(first) = &report.lobby_first {
        println!("lobby first: {first}");
    }
}

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str);

    let mut api = match EngineApi::from_setup(demo_setup("run_local_001")) {
        Ok(api) => api,
        Err(err) => {
            eprintln!("error: failed to build demo scenario: {err}");
            std::process::exit(1);
        }
    };

    match command {
        Some("status") => {
            println!("{}", api.status());
        }
        Some("step") => {
            let rounds = args.get(2).and_then(|v| v.parse::<u32>().ok()).unwrap_or(1);
            match api.step(rounds) {
                Ok((status, committed)) => println!("stepped={} {}", committed, status),
                Err(err) => {
                    eprintln!("error: {err}");
                    std::process::exit(1);
                }
            }
        }
        Some("influence") => {
            print_influence(&api);
        }
        Some("serve") => match parse_socket_addr(args.get(2)) {
            Ok(addr) => {
                println!("serving api on http://{addr}");
                if let Err(err) = serve(addr).await {
                    eprintln!("server error: {err}");
                    std::process::exit(1);
                }
            }
            Err(err) => {
                eprintln!("error: {}", err);
                print_usage();
                std::process::exit(2);
            }
        },
        Some("simulate") => {
            if let Err(err) = run_simulation(&args) {
                eprintln!("error: {err}");
                print_usage();
                std::process::exit(2);
            }
        }
        Some("run-to") => match parse_u32(args.get(2), "round") {
            Ok(target_round) => {
                let current = api.status().current_round;
                let rounds = target_round.saturating_sub(current);
                match api.step(rounds) {
                    Ok((status, committed)) => println!("committed={} {}", committed, status),
                    Err(err) => {
                        eprintln!("error: {err}");
                        std::process::exit(1);
                    }
                }
            }
            Err(err) => {
                eprintln!("error: {}", err);
                print_usage();
                std::process::exit(2);
            }
        },
        _ => {
            print_usage();
        }
    }
}
