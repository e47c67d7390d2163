//! Tree command - build a reply forest from a snapshot file

use anyhow::{Context, Result, bail};
use serde::Serialize;
use std::fs;
use std::io::{self, Read};
use std::path::Path;
use threadline_domain::Reply;
use threadline_domain::usecases::{ReplyForest, ThreadEntry};

use crate::args::TreeArgs;
use crate::render;

#[derive(Debug, Serialize)]
struct TreeOutput {
    count: usize,
    roots: usize,
    tree: Vec<ThreadEntry>,
}

pub async fn execute(args: TreeArgs) -> Result<()> {
    let input = read_input(&args.file)?;
    let replies: Vec<Reply> =
        serde_json::from_str(&input).context("Expected a JSON array of replies")?;

    if let Some(post_id) = replies.first().map(|r| &r.post_id) {
        if replies.iter().any(|r| &r.post_id != post_id) {
            bail!("Replies belong to more than one post");
        }
    }

    let forest = ReplyForest::build(replies);
    tracing::debug!(count = forest.len(), roots = forest.roots().len(), "Built reply tree");

    if args.json {
        let output = TreeOutput {
            count: forest.len(),
            roots: forest.roots().len(),
            tree: forest.entries(),
        };
        let json = serde_json::to_string_pretty(&output).context("Failed to serialize tree")?;
        println!("{}", json);
    } else {
        print!("{}", render::forest_text(&forest, None));
    }

    Ok(())
}

fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read stdin")?;
        return Ok(buffer);
    }

    fs::read_to_string(path).with_context(|| format!("Failed to read file: {}", path.display()))
}
