use clap::Parser;
use hictrans::cooler::{ContactSource, ContactStore};
use hictrans::eigdecomp::{eigs_trans, CorrMetric, EigsTransOpts, MatrixLayout, TransOpts};
use hictrans::output::{write_outputs, OutputPaths};
use hictrans::track::{align_track, read_track, TrackSpec};
use hictrans::view::{read_regions, resolve_view};
use log::{info, warn};
use std::io;
use std::path::PathBuf;

/// Common options shared between all commands
#[derive(Parser, Debug)]
struct CommonOpts {
    /// Path to the contact matrix store directory (chroms.tsv, bins.tsv, pixels.tsv).
    #[clap(value_parser)]
    contact_path: PathBuf,

    /// Force re-parsing of the pixel table, even if a cache already exists.
    #[clap(short = 'I', long, action)]
    force_reindex: bool,

    /// Verbosity level (0 = error, 1 = info, 2 = debug)
    #[clap(short, long, default_value = "0")]
    verbose: u8,
}

/// Compartment signal from trans Hi-C contacts.
#[derive(Parser, Debug)]
#[command(author, version, about, disable_help_subcommand = true)]
enum Args {
    /// Eigendecomposition of the trans (inter-region) part of a contact matrix
    EigsTrans {
        #[clap(flatten)]
        common: CommonOpts,

        /// Prefix of the output files (<prefix>.trans.lam.txt, <prefix>.trans.vecs.tsv)
        #[clap(short = 'o', long, value_parser)]
        out_prefix: String,

        /// Reference track used to orient and rank eigenvectors, as PATH[::COLUMN].
        /// COLUMN is a 0-based index (default 3) or a header name.
        #[clap(long, value_parser)]
        reference_track: Option<TrackSpec>,

        /// BED-like file with the view regions (chrom start end [name]).
        /// Defaults to whole chromosomes.
        #[clap(long, alias = "regions", value_parser)]
        view: Option<PathBuf>,

        /// Number of eigenvectors to compute
        #[clap(long, value_parser, default_value_t = 3)]
        n_eigs: usize,

        /// Name of the balancing weight column in the bin table
        #[clap(long, value_parser, default_value = "weight")]
        clr_weight_name: String,

        /// Also write E1 as <prefix>.trans.bw (requires bedGraphToBigWig)
        #[clap(long, action)]
        bigwig: bool,

        /// In-memory matrix layout: dense or sparse
        #[clap(long, value_parser, default_value = "dense")]
        layout: MatrixLayout,

        /// Correlation metric for orientation and ranking: pearson, spearman, var-explained
        #[clap(long, value_parser, default_value = "pearson")]
        corr_metric: CorrMetric,

        /// Skip iterative correction of the trans-only matrix
        #[clap(long, action)]
        no_trans_balance: bool,

        /// Clip trans values above this percentile (0-100) before decomposition
        #[clap(long, value_parser)]
        clip_percentile: Option<f64>,
    },
}

fn main() -> io::Result<()> {
    let args = Args::parse();

    match args {
        Args::EigsTrans {
            common,
            out_prefix,
            reference_track,
            view,
            n_eigs,
            clr_weight_name,
            bigwig,
            layout,
            corr_metric,
            no_trans_balance,
            clip_percentile,
        } => {
            init_logger(&common);

            let store = ContactStore::open(&common.contact_path, common.force_reindex)?;

            let regions = match &view {
                Some(path) => {
                    let rows = read_regions(path)?;
                    info!("Read {} view regions from {}", rows.len(), path.display());
                    Some(rows)
                }
                None => None,
            };
            let view = resolve_view(store.chromsizes(), regions, true)?;

            let track = match &reference_track {
                Some(spec) => Some(read_track(spec)?),
                None => {
                    warn!("No reference track given; eigenvectors keep their decomposition order and sign");
                    None
                }
            };
            let aligned = align_track(store.bins().clone(), track)?;

            let opts = EigsTransOpts {
                n_eigs,
                clr_weight_name,
                corr_metric,
                trans: TransOpts {
                    layout,
                    balance: !no_trans_balance,
                    clip_percentile,
                },
            };
            let result = eigs_trans(&store, &view, aligned, &opts)?;

            let paths = OutputPaths::new(&out_prefix, bigwig);
            write_outputs(&result, &paths)?;
        }
    }

    Ok(())
}

fn init_logger(common: &CommonOpts) {
    // Initialize logger based on verbosity
    env_logger::Builder::new()
        .filter_level(match common.verbose {
            0 => log::LevelFilter::Error,
            1 => log::LevelFilter::Info,
            _ => log::LevelFilter::Debug,
        })
        .init();
}
