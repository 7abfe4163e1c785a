use clap::Parser;
use clap_num::maybe_hex;
use lazy_static::lazy_static;

#[derive(Parser, Debug)]
#[command(author,version,about,long_about=None)]
pub struct Args {
    /// Binary (.bin), Intel hex (.hex) or program text (.s68) file to translate/run
    pub file: Option<String>,

    /// Translate the given opcode words (hex) instead of reading a file
    #[arg(long, num_args = 1..)]
    pub words: Vec<String>,

    /// Address at which the image is loaded and execution starts (hex ok with '0x')
    #[arg(long,value_parser=maybe_hex::<u32>, default_value_t=0x1000_u32)]
    pub org: u32,

    /// Size of guest memory in bytes
    #[arg(long,value_parser=maybe_hex::<u32>, default_value_t=0x10_0000_u32)]
    pub mem_size: u32,

    /// Print each translated guest instruction with its host code
    #[arg(short, long)]
    pub list: bool,

    /// Include AArch64 machine words in the listing
    #[arg(long)]
    pub encode: bool,

    /// Execute the translated code and evaluate any test criteria
    #[arg(short, long)]
    pub run: bool,

    /// Cross-check every executed block against the reference model
    #[arg(long)]
    pub verify: bool,

    /// Maximum number of blocks to execute
    #[arg(long, default_value_t = 100_000)]
    pub max_steps: u64,

    /// Compute every produced flag instead of trimming dead ones
    #[arg(long)]
    pub no_liveness: bool,

    /// Maximum number of guest instructions per translated block
    #[arg(long, default_value_t = 64)]
    pub max_block: usize,

    /// Print the MD5 digest of the loaded image
    #[arg(long)]
    pub md5: bool,

    /// Display perf data
    #[arg(long)]
    pub perf: bool,

    /// Trace each block as it is executed
    #[arg(short, long)]
    pub trace: bool,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

lazy_static! {
    pub static ref ARGS: Args = if cfg!(test) {
        // manually set parameters for running tests
        Args::parse_from(["test", "--run"])
    } else {
        Args::parse()
    };
}

pub fn run() -> bool { ARGS.run || ARGS.verify }
/// flag liveness trimming is disabled when verifying, since the model computes every flag
pub fn liveness() -> bool { !ARGS.no_liveness && !ARGS.verify }
