use clap::{Parser, Subcommand};
use rust_arqr::render::{BackgroundPreviewResolver, PreviewCompositor, StaticPreviewResolver};
use rust_arqr::tools::{load_rgb, parse_corners, ImageSequenceSource};
use rust_arqr::utils::geometry::{edge_angles, is_plausible_quad};
use rust_arqr::{ArqrConfig, Result, ScriptedDecoder, Session, TrackingOrchestrator};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;

#[derive(Parser)]
#[command(name = "arqrtool", version, about = "Code tracking and preview compositing tools")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Warp an overlay image below a code on a single frame
    Composite {
        #[arg(long)]
        frame: PathBuf,
        #[arg(long)]
        overlay: PathBuf,
        /// Code corners as "x0,y0 x1,y1 x2,y2 x3,y3"
        #[arg(long)]
        corners: String,
        #[arg(long)]
        out: PathBuf,
    },
    /// Run the tracker over a directory of frames with scripted detections
    Replay {
        #[arg(long)]
        frames: PathBuf,
        /// Detections manifest, one "<frame> <type> x0 y0 .. x3 y3 <payload>" per line
        #[arg(long)]
        detections: PathBuf,
        /// Tab-separated payload to preview image table
        #[arg(long)]
        previews: Option<PathBuf>,
        /// Payload to show as a preview (repeatable)
        #[arg(long = "enable")]
        enable: Vec<String>,
        /// Resolve previews off the frame path
        #[arg(long)]
        background: bool,
        /// Directory for rendered frames
        #[arg(long)]
        out: Option<PathBuf>,
        /// Mark decoded frames blue and optical-flow frames green
        #[arg(long)]
        indicators: bool,
    },
    /// Print the edge turn angles of a quad and whether it passes the shape check
    CheckQuad {
        #[arg(long)]
        corners: String,
    },
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Composite {
            frame,
            overlay,
            corners,
            out,
        } => composite_cmd(&frame, &overlay, &corners, &out),
        Command::Replay {
            frames,
            detections,
            previews,
            enable,
            background,
            out,
            indicators,
        } => replay_cmd(ReplayArgs {
            frames,
            detections,
            previews,
            enable,
            background,
            out,
            indicators,
        }),
        Command::CheckQuad { corners } => check_quad_cmd(&corners),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn composite_cmd(frame: &Path, overlay: &Path, corners: &str, out: &Path) -> Result<()> {
    let config = ArqrConfig::from_env();
    let corners = parse_corners(corners)?;
    let frame = load_rgb(frame)?;
    let overlay = load_rgb(overlay)?;

    let compositor = PreviewCompositor::new(config.compositor);
    let placement = compositor.placement_quad(&corners);
    let started = Instant::now();
    let result = compositor.composite(&frame, &corners, &overlay, frame.width(), frame.height());
    println!(
        "Placement: {:?} ({:.2}ms)",
        placement.map(|p| (p.x, p.y)),
        started.elapsed().as_secs_f64() * 1000.0
    );

    result.save(out)?;
    println!("Wrote {}", out.display());
    Ok(())
}

struct ReplayArgs {
    frames: PathBuf,
    detections: PathBuf,
    previews: Option<PathBuf>,
    enable: Vec<String>,
    background: bool,
    out: Option<PathBuf>,
    indicators: bool,
}

fn replay_cmd(args: ReplayArgs) -> Result<()> {
    let mut config = ArqrConfig::from_env();
    config.annotation.indicators |= args.indicators;

    let decoder = ScriptedDecoder::from_manifest(&args.detections)?;
    let mut orchestrator = TrackingOrchestrator::new(decoder, &config)?;
    if let Some(manifest) = &args.previews {
        let resolver = StaticPreviewResolver::from_manifest(manifest)?;
        println!("Loaded {} preview path(s)", resolver.len());
        orchestrator = if args.background {
            orchestrator.with_preview_resolver(BackgroundPreviewResolver::new(resolver))
        } else {
            orchestrator.with_preview_resolver(resolver)
        };
    }

    let mut session = Session::new(orchestrator);
    for payload in &args.enable {
        session.toggle_preview(payload);
    }

    if let Some(dir) = &args.out {
        fs::create_dir_all(dir)?;
    }

    let mut source = ImageSequenceSource::from_dir(&args.frames)?;
    println!("Replaying {} frame(s) from {}", source.len(), args.frames.display());

    let mut index = 0usize;
    let mut detected = 0usize;
    let started = Instant::now();
    let processed = session.run(&mut source, |outcome| {
        let how = if !outcome.any_detected {
            "-"
        } else if outcome.via_flow {
            "flow"
        } else {
            "decode"
        };
        println!(
            "  frame {index:04}: {how:<6} {}",
            outcome.primary_payload.as_deref().unwrap_or("")
        );
        if outcome.any_detected {
            detected += 1;
        }
        if let Some(dir) = &args.out {
            outcome.frame.save(dir.join(format!("{index:04}.png")))?;
        }
        index += 1;
        Ok(())
    })?;

    if let Some(link) = session.handle().last_result().link() {
        println!("Last code links to {link}");
    }
    let elapsed = started.elapsed().as_secs_f64();
    println!(
        "Processed {processed} frame(s), codes shown on {detected} ({:.1} fps)",
        if elapsed > 0.0 { processed as f64 / elapsed } else { 0.0 }
    );
    Ok(())
}

fn check_quad_cmd(corners: &str) -> Result<()> {
    let config = ArqrConfig::from_env();
    let corners = parse_corners(corners)?;
    match edge_angles(&corners) {
        Ok(angles) => {
            let degrees: Vec<String> = angles.iter().map(|a| format!("{:.1}", a.to_degrees())).collect();
            println!("Edge turn angles (deg): {}", degrees.join(" "));
            println!(
                "Angle sum: {:.1}",
                angles.iter().sum::<f32>().to_degrees()
            );
        }
        Err(err) => println!("Angles unavailable: {err}"),
    }
    let verdict = if is_plausible_quad(&corners, &config.gate.shape) {
        "plausible"
    } else {
        "rejected"
    };
    println!("Shape: {verdict}");
    Ok(())
}
