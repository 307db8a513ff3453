use std::error::Error;

use vergen::{Build, Cargo, Rustc, Sysinfo};
use vergen_git2::{Emitter, Git2};

fn main() -> Result<(), Box<dyn Error>> {
    let build = Build::all_build();
    let cargo = Cargo::all_cargo();
    let rustc = Rustc::all_rustc();
    let si = Sysinfo::all_sysinfo();
    let git = Git2::all_git();

    Emitter::default()
        .idempotent()
        .add_instructions(&build)?
        .add_instructions(&cargo)?
        .add_instructions(&rustc)?
        .add_instructions(&si)?
        .add_instructions(&git)?
        .emit()?;

    Ok(())
}
