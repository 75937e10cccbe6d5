//! Pairwise scan registration
//!
//! Registers a scan onto a reference scan twice, once with FPFH and once with
//! SHOT descriptors, refines both results with ICP and optionally writes the
//! aligned clouds.
//!
//! Usage:
//!   scanreg --file-path data/bun045.ply --ref-file-path data/bun000.ply
//!   scanreg --matching-algorithm ransac --conf-file-path data/bun.conf
//!
//! Set `RUST_LOG=debug` for per-stage details.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use scanreg_algorithms::{
    select_keypoints, DescriptorKind, FpfhParams, KeypointParams, KeypointStrategy,
    MatchingStrategy, PipelineConfig, RansacParams, RegistrationPipeline, RegistrationReport,
    ShotParams,
};
use scanreg_core::{Instrumentation, PointCloud, RigidTransform};
use scanreg_io::{read_calibration, read_point_cloud, write_ply, PlyColumn};
use std::fs;
use std::path::{Path, PathBuf};

/// Keypoint selection algorithm
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum QuerySelection {
    Random,
    Iterative,
    Subsampling,
}

impl From<QuerySelection> for KeypointStrategy {
    fn from(selection: QuerySelection) -> Self {
        match selection {
            QuerySelection::Random => KeypointStrategy::Random,
            QuerySelection::Iterative => KeypointStrategy::Iterative,
            QuerySelection::Subsampling => KeypointStrategy::Subsampling,
        }
    }
}

/// Descriptor matching algorithm
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Matching {
    Simple,
    Double,
    Ransac,
}

impl Matching {
    fn name(self) -> &'static str {
        match self {
            Matching::Simple => "simple",
            Matching::Double => "double",
            Matching::Ransac => "ransac",
        }
    }
}

impl From<Matching> for MatchingStrategy {
    fn from(matching: Matching) -> Self {
        match matching {
            Matching::Simple => MatchingStrategy::Simple,
            Matching::Double => MatchingStrategy::Double,
            Matching::Ransac => MatchingStrategy::Ransac,
        }
    }
}

/// Register a scan onto a reference scan with FPFH and SHOT descriptors
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Point cloud to align (PLY with normals)
    #[arg(long, default_value = "./data/bunny_returned.ply")]
    file_path: PathBuf,

    /// Reference point cloud (PLY with normals)
    #[arg(long, default_value = "./data/bunny_original.ply")]
    ref_file_path: PathBuf,

    /// Calibration manifest used to count correct matches
    #[arg(long)]
    conf_file_path: Option<PathBuf>,

    /// Skip writing the registered clouds
    #[arg(long)]
    disable_ply_writing: bool,

    /// Algorithm selecting the points descriptors are computed at
    #[arg(long, value_enum, default_value_t = QuerySelection::Random)]
    query_points_selection: QuerySelection,

    /// Algorithm matching the descriptors
    #[arg(long, value_enum, default_value_t = Matching::Simple)]
    matching_algorithm: Matching,

    /// Neighborhood radius of the SPFH histograms
    #[arg(long, default_value_t = 1e-2)]
    fpfh_radius: f64,

    /// Bins per FPFH angular feature
    #[arg(long, default_value_t = 5)]
    fpfh_n_bins: usize,

    /// Nearest neighbors blended into each FPFH
    #[arg(long, default_value_t = 10)]
    fpfh_k: usize,

    /// Support radius of SHOT
    #[arg(long, default_value_t = 1e-1)]
    shot_radius: f64,

    /// Ratio test threshold of double matching
    #[arg(long, default_value_t = 0.8)]
    reject_threshold: f64,

    /// Directory receiving the registered clouds
    #[arg(long, default_value = "./data/results")]
    output_dir: PathBuf,

    /// Seed of keypoint selection and RANSAC
    #[arg(long, default_value_t = 0)]
    seed: u64,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        let defaults = PipelineConfig::default();
        PipelineConfig {
            keypoints: KeypointParams {
                strategy: self.query_points_selection.into(),
                // keypoint spacing follows the SHOT support
                radius: self.shot_radius / 50.0,
                seed: self.seed,
                ..defaults.keypoints
            },
            matching: self.matching_algorithm.into(),
            fpfh: FpfhParams {
                radius: self.fpfh_radius,
                n_bins: self.fpfh_n_bins,
                k: self.fpfh_k,
                ..defaults.fpfh
            },
            shot: ShotParams {
                radius: self.shot_radius,
                ..defaults.shot
            },
            reject_threshold: self.reject_threshold,
            ransac: RansacParams {
                seed: self.seed,
                ..defaults.ransac
            },
            icp: defaults.icp,
        }
    }
}

fn read_cloud(path: &Path) -> Result<PointCloud> {
    read_point_cloud(path).with_context(|| format!("failed to read {}", path.display()))
}

fn scan_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "scan".to_string())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    run(&args)
}

fn run(args: &Args) -> Result<()> {
    let mut instrumentation = Instrumentation::new();

    let source = read_cloud(&args.file_path)?;
    let reference = read_cloud(&args.ref_file_path)?;
    let truth = match &args.conf_file_path {
        Some(path) => {
            let calibration = read_calibration(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let truth = calibration
                .ground_truth(
                    &args.file_path.to_string_lossy(),
                    &args.ref_file_path.to_string_lossy(),
                )
                .context("calibration does not cover both scans")?;
            Some(truth)
        }
        None => None,
    };
    instrumentation.checkpoint("reading the data");

    let pipeline =
        RegistrationPipeline::new(args.pipeline_config()).context("invalid configuration")?;
    let source_keypoints = pipeline.select_keypoints(&source)?;
    let reference_params = KeypointParams {
        seed: args.seed.wrapping_add(1),
        ..pipeline.config().keypoints.clone()
    };
    let reference_keypoints = select_keypoints(&reference, &reference_params)?;
    instrumentation.checkpoint("selecting the keypoints");

    let mut reports = Vec::new();
    for kind in [DescriptorKind::Fpfh, DescriptorKind::Shot] {
        let report = pipeline
            .register(
                kind,
                &source,
                &source_keypoints,
                &reference,
                &reference_keypoints,
                Some(&mut instrumentation),
            )
            .with_context(|| format!("{} registration failed", kind))?;

        if let Some(truth) = &truth {
            print_correct_matches(
                &report,
                &source,
                &source_keypoints,
                &reference,
                &reference_keypoints,
                truth,
            )?;
        }
        reports.push(report);
    }

    println!();
    for report in &reports {
        println!("RMS error with {}: {:.2e}", report.descriptor, report.coarse.rms);
    }
    for report in &reports {
        println!("RMS error with {} + ICP: {:.2e}", report.descriptor, report.refined.rms);
    }
    for report in &reports {
        println!(
            "The ICP starting from the registration obtained by matching {} descriptors has{} converged.",
            report.descriptor,
            if report.refined.converged { "" } else { " not" }
        );
        if !report.refined.reliable {
            println!("The {} registration is unreliable.", report.descriptor);
        }
    }

    if !args.disable_ply_writing {
        write_results(args, &source, &reports)?;
        instrumentation.checkpoint("writing the registered clouds");
    }

    instrumentation.finish("total time");
    Ok(())
}

fn print_correct_matches(
    report: &RegistrationReport,
    source: &PointCloud,
    source_keypoints: &[usize],
    reference: &PointCloud,
    reference_keypoints: &[usize],
    truth: &RigidTransform,
) -> Result<()> {
    let source_positions = source.select_points(source_keypoints)?;
    let reference_positions = reference.select_points(reference_keypoints)?;
    let correct = report.correct_matches(&source_positions, &reference_positions, truth)?;
    println!(
        "{}: {} correct matches out of {} descriptors.",
        report.descriptor,
        correct,
        source_keypoints.len()
    );
    Ok(())
}

fn write_results(args: &Args, source: &PointCloud, reports: &[RegistrationReport]) -> Result<()> {
    fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("failed to create {}", args.output_dir.display()))?;
    let name = scan_name(&args.file_path);
    let algorithm = args.matching_algorithm.name();

    for report in reports {
        let descriptor = report.descriptor.name().to_lowercase();
        let coarse = report.coarse.transform.transform_points(source.points());
        let outputs = [
            (format!("{}_registered_{}-{}.ply", name, descriptor, algorithm), coarse),
            (
                format!("{}_registered_{}_icp-{}.ply", name, descriptor, algorithm),
                report.refined.aligned.points().to_vec(),
            ),
        ];
        for (file_name, points) in outputs {
            let path = args.output_dir.join(file_name);
            write_ply(&path, &[PlyColumn::points(&points)], &["x", "y", "z"])
                .with_context(|| format!("failed to write {}", path.display()))?;
            log::info!("wrote {}", path.display());
        }
    }
    Ok(())
}
