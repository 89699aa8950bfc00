use clap::{Parser, Subcommand, ValueEnum};
use tracing::Level;

use dcb_core::attr::{Attr, Eltwise, EltwiseKind, OutputScale, PostOp, SumPostOp};
use dcb_core::cfg::CfgSet;
use dcb_core::problem::{Alg, Direction, Problem};
use dcb_core::CaseState;
use dcb_cpu::CpuBackend;
use dcb_harness::{run_case, RunConfig, RunMode};

#[derive(Parser)]
#[command(name = "dcb")]
#[command(about = "Deconvolution differential test harness")]
struct Args {
    #[command(subcommand)]
    cmd: Cmd,

    /// Emit one JSON object per case instead of the text summary.
    #[arg(long, global = true)]
    json: bool,

    /// Increase log verbosity (-v info, -vv debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Cmd {
    /// Run the built-in case batch against the host backend.
    Smoke {
        #[arg(long, value_enum, default_value = "correctness")]
        mode: ModeArg,
    },
    /// Print the built-in case batch without running anything.
    List,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModeArg {
    Correctness,
    Performance,
    Both,
}

impl From<ModeArg> for RunMode {
    fn from(m: ModeArg) -> RunMode {
        match m {
            ModeArg::Correctness => RunMode::Correctness,
            ModeArg::Performance => RunMode::Performance,
            ModeArg::Both => RunMode::Both,
        }
    }
}

fn main() {
    let args = Args::parse();
    let level = match args.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt().with_max_level(level).init();

    match args.cmd {
        Cmd::List => {
            for prb in batch() {
                println!("{prb}");
            }
        }
        Cmd::Smoke { mode } => {
            let cfg = RunConfig {
                mode: mode.into(),
                ..RunConfig::default()
            };
            if !smoke(&cfg, args.json) {
                std::process::exit(1);
            }
        }
    }
}

fn smoke(cfg: &RunConfig, json: bool) -> bool {
    let mut counts = [0usize; 4]; // passed, skipped, unimplemented, failed
    for prb in batch() {
        let res = run_case(&CpuBackend, &prb, cfg);
        match res.state {
            CaseState::Passed | CaseState::Executed => counts[0] += 1,
            CaseState::Skipped => counts[1] += 1,
            CaseState::Unimplemented => counts[2] += 1,
            _ => counts[3] += 1,
        }
        if json {
            let line = serde_json::json!({
                "case": prb.to_string(),
                "result": res,
            });
            println!("{line}");
        } else {
            let verdict = match res.state {
                CaseState::Failed => match &res.error {
                    Some(e) => format!("FAILED ({e})"),
                    None => "FAILED".to_string(),
                },
                state => format!("{state:?}").to_uppercase(),
            };
            println!("{verdict:<16} {prb}");
        }
    }
    if !json {
        println!(
            "\n{} passed, {} skipped, {} unimplemented, {} failed",
            counts[0], counts[1], counts[2], counts[3]
        );
    }
    counts[3] == 0
}

/// The built-in smoke batch: every direction, every dtype family, a
/// grouped/strided shape, and the attribute combinations the harness
/// treats specially.
fn batch() -> Vec<Problem> {
    let mut cases = Vec::new();

    for dir in [
        Direction::FwdInference,
        Direction::FwdBias,
        Direction::BwdData,
        Direction::BwdWeights,
        Direction::BwdWeightsBias,
    ] {
        cases.push(Problem::new_2d(
            dir,
            Alg::Direct,
            CfgSet::all_f32(),
            2,
            1,
            8,
            8,
            (13, 13),
            (3, 3),
            (1, 1),
            (1, 1),
        ));
    }

    // grouped and strided upsampling
    cases.push(Problem::new_2d(
        Direction::FwdBias,
        Alg::Direct,
        CfgSet::all_f32(),
        2,
        2,
        8,
        8,
        (7, 7),
        (4, 4),
        (2, 2),
        (1, 1),
    ));

    for cfg in [
        CfgSet::f16(),
        CfgSet::bf16(),
        CfgSet::u8s8s8(),
        CfgSet::u8s8u8(),
        CfgSet::s8s8f32(),
    ] {
        cases.push(Problem::new_2d(
            Direction::FwdBias,
            Alg::Direct,
            cfg,
            2,
            1,
            8,
            8,
            (9, 9),
            (3, 3),
            (1, 1),
            (1, 1),
        ));
    }

    // fused attribute combinations
    let attrs = [
        Attr {
            post_ops: vec![PostOp::Eltwise(Eltwise::new(EltwiseKind::Relu, 0.0, 0.0))],
            ..Attr::default()
        },
        Attr {
            post_ops: vec![PostOp::Sum(SumPostOp { scale: 1.0, dt: None })],
            ..Attr::default()
        },
        Attr {
            oscale: OutputScale::Common(0.5),
            ..Attr::default()
        },
    ];
    for attr in attrs {
        cases.push(
            Problem::new_2d(
                Direction::FwdBias,
                Alg::Direct,
                CfgSet::all_f32(),
                2,
                1,
                8,
                8,
                (9, 9),
                (3, 3),
                (1, 1),
                (1, 1),
            )
            .with_attr(attr),
        );
    }
    cases.push(
        Problem::new_2d(
            Direction::FwdInference,
            Alg::Direct,
            CfgSet::u8s8s8(),
            2,
            1,
            8,
            8,
            (9, 9),
            (3, 3),
            (1, 1),
            (1, 1),
        )
        .with_attr(Attr {
            src_zp: Some(2),
            dst_zp: Some(-1),
            ..Attr::default()
        }),
    );

    // exercises the unimplemented path: no host Winograd kernels
    cases.push(Problem::new_2d(
        Direction::FwdInference,
        Alg::Wino,
        CfgSet::all_f32(),
        2,
        1,
        8,
        8,
        (9, 9),
        (3, 3),
        (1, 1),
        (1, 1),
    ));

    cases
}
