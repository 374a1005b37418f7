use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use bgv_lazy::config::Config;
use bgv_lazy::connection::Server;
use bgv_lazy::lazy::{Feedback, LazyContent, ProgressFeedback};
use bgv_lazy::model::{FolderElement, Group};
use bgv_lazy::session::ImportSession;
use bgv_lazy::stream::{DumpWriter, GraphSpec, NodeClassSpec, NodeSpec, PortValue, Prop};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bgv-lazy", version, about = "Lazy loader for binary graph dumps")]
struct Cli {
    /// TOML 配置文件
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 扫描 dump 文件并打印分组树
    Open {
        file: PathBuf,
        /// 文件仍在写入：到尾后等待增长
        #[arg(long)]
        follow: bool,
        /// 补全所有顶层分组
        #[arg(long)]
        expand: bool,
        /// 不走懒加载
        #[arg(long, conflicts_with_all = ["follow", "expand"])]
        eager: bool,
        #[arg(long)]
        json: bool,
    },
    /// 监听 TCP 端口接收 dump
    Serve {
        #[arg(long)]
        port: Option<u16>,
    },
    /// 生成一个示例 dump
    Sample {
        out: PathBuf,
        #[arg(long, default_value_t = 3)]
        groups: usize,
        #[arg(long, default_value_t = 4)]
        graphs: usize,
    },
}

#[derive(Serialize)]
struct TreeEntry {
    name: String,
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    nodes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    complete: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    children: Vec<TreeEntry>,
}

fn tree(element: &FolderElement) -> TreeEntry {
    match element {
        FolderElement::Graph(g) => TreeEntry {
            name: g.title.clone(),
            kind: "graph",
            nodes: Some(g.nodes.len()),
            complete: None,
            children: Vec::new(),
        },
        FolderElement::Group(g) => TreeEntry {
            name: g.name(),
            kind: "group",
            nodes: None,
            complete: Some(g.is_complete()),
            children: g.elements().iter().map(tree).collect(),
        },
    }
}

fn print_tree(entry: &TreeEntry, depth: usize) {
    let pad = "  ".repeat(depth);
    match (entry.kind, entry.nodes, entry.complete) {
        ("graph", Some(n), _) => println!("{}- {} ({} nodes)", pad, entry.name, n),
        (_, _, Some(false)) => println!("{}+ {} [not loaded]", pad, entry.name),
        _ => println!("{}+ {}", pad, entry.name),
    }
    for child in &entry.children {
        print_tree(child, depth + 1);
    }
}

fn expand(group: &Arc<Group>) {
    let feedback = ProgressFeedback::new();
    let handle = group.complete_contents(Some(feedback.clone() as Arc<dyn Feedback>));
    let items = handle.get();
    let (done, total) = feedback.progress();
    info!(
        "Expanded '{}': {} elements ({}/{} bytes)",
        group.name(),
        items.len(),
        done,
        total
    );
}

fn open(
    config: Config,
    file: &Path,
    follow: bool,
    expand_all: bool,
    eager: bool,
    json: bool,
) -> anyhow::Result<()> {
    let session = ImportSession::new(config)?;
    if eager {
        session.load_eager(file)?;
    } else {
        let report = session.scan_file(file, follow)?.join()?;
        info!(
            "Scanned {} bytes, {} lazy groups",
            report.summary.end, report.groups
        );
    }
    if expand_all {
        for group in session.document().groups() {
            expand(&group);
        }
    }
    // 等通知线程把登记 / changed 处理完
    session.shutdown();

    let entries: Vec<TreeEntry> = session.document().elements().iter().map(tree).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
    } else {
        for e in &entries {
            print_tree(e, 0);
        }
        eprintln!("{}", session.stats());
    }
    Ok(())
}

fn sample(out: &Path, groups: usize, graphs: usize) -> anyhow::Result<()> {
    let mut w = DumpWriter::with_pool_capacity(64);
    w.header();
    let add = NodeClassSpec {
        name: "org.example.nodes.AddNode".into(),
        template: "+ {p#stamp}".into(),
        inputs: vec![(false, "x".into()), (false, "y".into())],
        successors: vec![(false, "next".into())],
    };
    for g in 0..groups {
        let name = format!("Phase {}", g);
        w.begin_group(
            &name,
            &format!("p{}", g),
            Some(("org.example.Compiler", "compile")),
            &[("type", Prop::str("phase")), ("index", Prop::Int(g as i32))],
        );
        for i in 0..graphs {
            let mut spec = GraphSpec::with_nodes(3, "org.example.nodes.ConstantNode");
            let mut n = NodeSpec::new(3, add.clone()).prop("stamp", Prop::str(format!("i{}", i)));
            n.inputs = vec![PortValue::Single(0), PortValue::Single(1)];
            n.successors = vec![PortValue::Single(-1)];
            spec.nodes.push(n);
            spec.props.push(("graph".into(), Prop::Long(i as i64)));
            w.graph(&format!("{} / after step {}", name, i), &spec);
        }
        w.close_group();
    }
    std::fs::write(out, w.bytes()).with_context(|| format!("writing {}", out.display()))?;
    info!("Wrote {} groups to {}", groups, out.display());
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };

    match cli.command {
        Command::Open {
            file,
            follow,
            expand,
            eager,
            json,
        } => {
            tokio::task::spawn_blocking(move || open(config, &file, follow, expand, eager, json))
                .await??;
        }
        Command::Serve { port } => {
            let mut server_cfg = config.server.clone();
            if let Some(p) = port {
                server_cfg.port = p;
            }
            let session = Arc::new(ImportSession::new(config)?);
            let server = Server::new(session.clone(), &server_cfg);
            info!("bgv-lazy serving on {}:{}", server_cfg.bind, server_cfg.port);
            tokio::select! {
                r = server.run() => r?,
                _ = tokio::signal::ctrl_c() => info!("Shutting down..."),
            }
            eprintln!("{}", session.stats());
        }
        Command::Sample { out, groups, graphs } => sample(&out, groups, graphs)?,
    }
    Ok(())
}
