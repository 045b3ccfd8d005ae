use argh::FromArgs;
use sharestate::{
    fs::{Credentials, FileId, Filesystem, MemFs},
    nfs4::{
        ops::{
            Close4Args, CreateHow4, FileAttributes, Open4Args, OpenClaim4, OpenConfirm4Args,
            OpenFlag4, OpenOwner4, SequenceId4, ShareAccess, ShareDeny, StateId4,
            OPEN4_RESULT_CONFIRM,
        },
        state::{share, Admission, ShareReservation},
        Context, OpenStateServer,
    },
    ServerConfig,
};
use std::{error::Error, path::PathBuf, sync::Arc};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(FromArgs)]
/// NFSv4 share reservation engine
struct Command {
    /// server configuration file (TOML)
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    #[argh(subcommand)]
    action: Action,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Action {
    ShareMatrix(ShareMatrix),
    Demo(Demo),
}

#[derive(FromArgs)]
/// Print the access/deny admission table
#[argh(subcommand, name = "share-matrix")]
struct ShareMatrix {}

#[derive(FromArgs)]
/// Run concurrent clients opening one file
#[argh(subcommand, name = "demo")]
struct Demo {
    /// number of clients, default is 12
    #[argh(option, short = 'n', default = "12")]
    clients: u32,
}

const ACCESS: [ShareAccess; 3] = [ShareAccess::READ, ShareAccess::WRITE, ShareAccess::BOTH];
const DENY: [ShareDeny; 4] = [
    ShareDeny::NONE,
    ShareDeny::READ,
    ShareDeny::WRITE,
    ShareDeny::BOTH,
];

fn all_reservations() -> impl Iterator<Item = ShareReservation> {
    ACCESS
        .into_iter()
        .flat_map(|a| DENY.into_iter().map(move |d| ShareReservation::new(a, d)))
}

fn share_matrix() {
    let mut admitted = 0;
    for existing in all_reservations() {
        for requested in all_reservations() {
            let outcome = share::evaluate(&existing, &requested);
            if outcome == Admission::Admit {
                admitted += 1;
            }
            println!("existing [{existing}]  requested [{requested}]  {outcome:?}");
        }
    }

    println!("{admitted} of 144 combinations admitted");
}

async fn demo(config: ServerConfig, clients: u32) -> Result<(), Box<dyn Error>> {
    let fs = Arc::new(MemFs::new());
    let root = fs.root();
    fs.create(
        root,
        "shared",
        &FileAttributes::new(),
        None,
        &Credentials::ROOT,
    )?;

    let server = Arc::new(OpenStateServer::new(config, fs));
    let reservations: Vec<ShareReservation> = all_reservations().collect();

    let tasks: Vec<_> = (0..clients)
        .map(|client| {
            let server = server.clone();
            let share = reservations[client as usize % reservations.len()];
            tokio::spawn(async move { run_client(&server, root, client, share) })
        })
        .collect();

    let mut granted = Vec::new();
    for task in tasks {
        let (client, share, outcome) = task.await?;
        match outcome {
            Ok(open) => {
                println!("client {client:>3} [{share}]  granted");
                granted.push(open);
            }
            Err(e) => println!("client {client:>3} [{share}]  {e}"),
        }
    }

    let file = server.fs().lookup(root, "shared")?;
    println!("aggregate while open: [{}]", server.file_share(file));

    for (owner, file, stateid, seqid) in granted {
        server.close(
            &Context::new(file, Credentials::ROOT),
            &Close4Args {
                seqid,
                open_stateid: stateid,
            },
        )?;
        info!(?owner, "closed");
    }
    println!("aggregate after close: [{}]", server.file_share(file));

    Ok(())
}

/// Owner, file, stateid and next seqid of a granted open
type ClientOpen = (OpenOwner4, FileId, StateId4, SequenceId4);

fn run_client(
    server: &OpenStateServer,
    root: FileId,
    client: u32,
    share: ShareReservation,
) -> (u32, ShareReservation, sharestate::result::Result<ClientOpen>) {
    let owner = OpenOwner4::new(client.into(), format!("demo-{client}").into_bytes());
    let ctx = Context::new(root, Credentials::ROOT);

    let outcome = server
        .open(
            &ctx,
            &Open4Args {
                seqid: 1,
                share_access: share.access.bits(),
                share_deny: share.deny.bits(),
                owner: owner.clone(),
                how: OpenFlag4::Create(CreateHow4::Unchecked(FileAttributes::new())),
                claim: OpenClaim4::null("shared"),
            },
        )
        .and_then(|res| {
            if res.result_flags & OPEN4_RESULT_CONFIRM == 0 {
                return Ok((owner.clone(), res.file, res.state_id, 2));
            }
            let confirmed = server.open_confirm(
                &Context::new(res.file, Credentials::ROOT),
                &OpenConfirm4Args {
                    open_stateid: res.state_id,
                    seqid: 2,
                },
            )?;
            Ok((owner.clone(), res.file, confirmed.open_stateid, 3))
        });

    (client, share, outcome)
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cmd: Command = argh::from_env();
    let config = match &cmd.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };

    match cmd.action {
        Action::ShareMatrix(_) => {
            share_matrix();
            Ok(())
        }
        Action::Demo(demo_args) => tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(demo(config, demo_args.clients)),
    }
}
