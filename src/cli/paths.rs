use std::path::PathBuf;

use clap::Args;

use super::load_item;

#[derive(Args)]
pub struct PathsArgs {
    /// Data item JSON: instructions plus per-instruction token ids
    pub item: PathBuf,
    /// Stop after printing this many paths
    #[arg(long)]
    pub limit: Option<usize>,
}

pub fn cmd_paths(args: PathsArgs) {
    let item = load_item(&args.item);
    let block = &item.block;

    for i in 0..block.len() {
        println!("{:>4}: parents {:?}", i, block.parents(i));
    }
    println!("roots:     {:?}", block.roots());
    println!("terminals: {:?}", block.terminal_instructions());

    let mut shown = 0usize;
    for path in block.paths().take(args.limit.unwrap_or(usize::MAX)) {
        let rendered: Vec<String> = path.iter().map(|i| i.to_string()).collect();
        println!("  {}", rendered.join(" -> "));
        shown += 1;
    }
    eprintln!("{} path(s)", shown);
}
