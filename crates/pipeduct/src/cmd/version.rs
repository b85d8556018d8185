use crate::cmd::VersionArgs;
use crate::exit::{CliResult, SUCCESS};

pub fn run(args: VersionArgs) -> CliResult<i32> {
    println!("pipeduct {}", env!("CARGO_PKG_VERSION"));
    if args.extended {
        println!(
            "target: {}",
            option_env!("PIPEDUCT_BUILD_TARGET").unwrap_or("unknown")
        );
    }
    Ok(SUCCESS)
}
