//! Scripted stand-in for the voice client's query interface
//!
//! Listens on a loopback port, answers every command through a responder
//! closure and lets a test inject notification records or drop the
//! connection at any time.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::codec::escape;

type Responder = Arc<dyn Fn(&str) -> Vec<String> + Send + Sync>;

#[derive(Debug, Clone)]
enum Control {
    Line(String),
    Close,
}

pub struct FakeVoiceClient {
    port: u16,
    commands: Arc<Mutex<Vec<String>>>,
    connections: Arc<AtomicUsize>,
    control: broadcast::Sender<Control>,
    accept_task: JoinHandle<()>,
}

impl FakeVoiceClient {
    pub async fn start<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        Self::start_inner(Arc::new(responder), Vec::new()).await
    }

    /// Like [`start`](Self::start), greeting each connection with a banner
    pub async fn start_with_banner<F>(responder: F) -> Self
    where
        F: Fn(&str) -> Vec<String> + Send + Sync + 'static,
    {
        let banner = vec![
            "TS3 Client".to_string(),
            "Welcome to the TeamSpeak 3 ClientQuery interface.".to_string(),
            "selected schandlerid=1".to_string(),
        ];
        Self::start_inner(Arc::new(responder), banner).await
    }

    async fn start_inner(responder: Responder, banner: Vec<String>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let commands = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let (control, _) = broadcast::channel(64);

        let accept_task = {
            let commands = Arc::clone(&commands);
            let connections = Arc::clone(&connections);
            let control = control.clone();
            tokio::spawn(async move {
                while let Ok((stream, _)) = listener.accept().await {
                    connections.fetch_add(1, Ordering::SeqCst);
                    tokio::spawn(serve(
                        stream,
                        Arc::clone(&responder),
                        banner.clone(),
                        Arc::clone(&commands),
                        control.subscribe(),
                    ));
                }
            })
        };

        Self {
            port,
            commands,
            connections,
            control,
            accept_task,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Every command received so far, across connections
    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a record to every open connection
    pub fn push(&self, line: &str) {
        let _ = self.control.send(Control::Line(line.to_string()));
    }

    /// Drop every open connection
    pub fn kick(&self) {
        let _ = self.control.send(Control::Close);
    }
}

impl Drop for FakeVoiceClient {
    fn drop(&mut self) {
        self.accept_task.abort();
        self.kick();
    }
}

async fn serve(
    stream: TcpStream,
    responder: Responder,
    banner: Vec<String>,
    commands: Arc<Mutex<Vec<String>>>,
    mut control: broadcast::Receiver<Control>,
) {
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    if !banner.is_empty() && write.write_all(join(&banner).as_bytes()).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Ok(Some(command)) = line else { break };
                let command = command.trim().to_string();
                commands.lock().unwrap().push(command.clone());
                let reply = (*responder)(&command);
                if write.write_all(join(&reply).as_bytes()).await.is_err() {
                    break;
                }
            }
            ctl = control.recv() => match ctl {
                Ok(Control::Line(line)) => {
                    if write.write_all(format!("{}\n", line).as_bytes()).await.is_err() {
                        break;
                    }
                }
                Ok(Control::Close) | Err(broadcast::error::RecvError::Closed) => break,
                Err(broadcast::error::RecvError::Lagged(_)) => {}
            }
        }
    }
}

fn join(lines: &[String]) -> String {
    lines.iter().map(|l| format!("{}\n", l)).collect()
}

/// One roster row for [`voice_server`]: client id, channel id, nickname
pub type Member = (&'static str, &'static str, &'static str);

/// Responder for a server where `me` sits in `my_cid` among `members`
///
/// Channels `1` and `2` exist; `clientinfo` answers for known members and
/// fails with `invalid clientID` otherwise.
pub fn voice_server(
    me: &'static str,
    my_cid: &'static str,
    members: Vec<Member>,
) -> impl Fn(&str) -> Vec<String> + Send + Sync + 'static {
    move |command: &str| {
        let ok = "error id=0 msg=ok".to_string();
        match command {
            "whoami" => vec![format!("clid={} cid={}", me, my_cid), ok],
            "clientlist -voice -info -groups" => {
                let rows: Vec<String> = members
                    .iter()
                    .map(|(clid, cid, nick)| {
                        format!(
                            "clid={} cid={} client_database_id=1{} client_nickname={} client_type=0 \
                             client_flag_talking=0 client_input_muted=0 client_output_muted=0 \
                             client_channel_group_id=8",
                            clid,
                            cid,
                            clid,
                            escape(nick)
                        )
                    })
                    .collect();
                vec![rows.join("|"), ok]
            }
            "channellist" => vec![
                "cid=1 pid=0 channel_order=0 channel_name=Lobby|cid=2 pid=0 channel_order=1 channel_name=AFK"
                    .to_string(),
                ok,
            ],
            "serverinfo" => vec!["virtualserver_name=Test\\sServer".to_string(), ok],
            "channelgrouplist" => vec!["cgid=5 name=Admin|cgid=8 name=Guest".to_string(), ok],
            other => {
                if let Some(clid) = other.strip_prefix("clientinfo clid=") {
                    return match members.iter().find(|(id, _, _)| *id == clid) {
                        Some((_, cid, nick)) => vec![
                            format!(
                                "cid={} client_nickname={} client_input_muted=0 client_output_muted=1",
                                cid,
                                escape(nick)
                            ),
                            ok,
                        ],
                        None => vec!["error id=512 msg=invalid\\sclientID".to_string()],
                    };
                }
                vec![ok]
            }
        }
    }
}
