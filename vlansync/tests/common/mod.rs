//! Test helpers: an in-process fake switch speaking a telnet-style CLI.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::net::tcp::OwnedWriteHalf;
use vlansync::device::{Credentials, TcpCliProvider};

pub const USERNAME: &str = "netops";
pub const PASSWORD: &str = "s3cret";
pub const ENABLE_SECRET: &str = "en4ble";

/// What the fake switch ended up with.
#[derive(Debug, Default)]
pub struct SwitchState {
    /// VLAN id -> (name, description)
    pub vlans: BTreeMap<u32, (String, String)>,
    /// Every line received while in a configuration mode.
    pub config_lines: Vec<String>,
    pub sessions: usize,
    pub exits: usize,
}

pub struct FakeSwitch {
    pub address: String,
    pub state: Arc<Mutex<SwitchState>>,
}

#[derive(Clone, Default)]
pub struct SwitchOptions {
    /// VLAN ids the switch refuses with a `%` error.
    pub reject: HashSet<u32>,
    /// Never say anything after accepting the connection.
    pub silent: bool,
    /// Ask only for a line password, no username.
    pub password_only: bool,
    /// Hold back the reply to this command for a while.
    pub stall_on: Option<(String, Duration)>,
}

impl FakeSwitch {
    pub async fn start(options: SwitchOptions) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(SwitchState::default()));

        let shared = state.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                shared.lock().unwrap().sessions += 1;
                tokio::spawn(serve(stream, options.clone(), shared.clone()));
            }
        });

        Self { address, state }
    }

    /// Sessions that ended with `exit`, waiting briefly for in-flight ones.
    pub async fn exits(&self) -> usize {
        for _ in 0..50 {
            let exits = self.state.lock().unwrap().exits;
            if exits > 0 {
                return exits;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        0
    }
}

pub fn credentials(password: &str, enable_secret: Option<&str>) -> Credentials {
    Credentials {
        username: USERNAME.to_string(),
        password: SecretString::from(password.to_string()),
        enable_secret: enable_secret.map(|s| SecretString::from(s.to_string())),
    }
}

pub fn fast_provider() -> TcpCliProvider {
    TcpCliProvider::new(23, Duration::from_secs(2), Duration::from_millis(500))
}

#[derive(Clone, Copy, PartialEq)]
enum Mode {
    User,
    Privileged,
    Config,
    ConfigVlan(u32),
}

fn prompt(mode: Mode) -> &'static str {
    match mode {
        Mode::User => "switch>",
        Mode::Privileged => "switch#",
        Mode::Config => "switch(config)#",
        Mode::ConfigVlan(_) => "switch(config-vlan)#",
    }
}

async fn say(writer: &mut OwnedWriteHalf, text: &str) {
    let _ = writer.write_all(text.as_bytes()).await;
}

async fn serve(stream: TcpStream, options: SwitchOptions, state: Arc<Mutex<SwitchState>>) {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    if options.silent {
        let _ = lines.next_line().await;
        return;
    }

    // Telnet negotiation noise the client has to skip.
    let _ = writer.write_all(&[255, 251, 1, 255, 251, 3]).await;
    say(&mut writer, "\r\nUser Access Verification\r\n\r\n").await;
    let username = if options.password_only {
        USERNAME.to_string()
    } else {
        say(&mut writer, "Username: ").await;
        let Ok(Some(username)) = lines.next_line().await else {
            return;
        };
        username
    };
    say(&mut writer, "Password: ").await;
    let Ok(Some(password)) = lines.next_line().await else {
        return;
    };
    if username.trim() != USERNAME || password.trim() != PASSWORD {
        say(&mut writer, "\r\n% Login invalid\r\n").await;
        return;
    }

    let mut mode = Mode::User;
    say(&mut writer, &format!("\r\n{}", prompt(mode))).await;

    while let Ok(Some(line)) = lines.next_line().await {
        let command = line.trim();
        let mut reply = String::from("\r\n");

        if matches!(mode, Mode::Config | Mode::ConfigVlan(_)) && command != "end" {
            state.lock().unwrap().config_lines.push(command.to_string());
        }
        if let Some((slow, delay)) = &options.stall_on {
            if command == slow {
                tokio::time::sleep(*delay).await;
            }
        }

        match (mode, command) {
            (_, "exit") if matches!(mode, Mode::User | Mode::Privileged) => {
                state.lock().unwrap().exits += 1;
                return;
            }
            (Mode::User, "enable") => {
                say(&mut writer, "Password: ").await;
                let Ok(Some(secret)) = lines.next_line().await else {
                    return;
                };
                if secret.trim() == ENABLE_SECRET {
                    mode = Mode::Privileged;
                } else {
                    reply.push_str("% Access denied\r\n");
                }
            }
            (Mode::Privileged, "configure terminal") => {
                reply.push_str("Enter configuration commands, one per line.  End with CNTL/Z.\r\n");
                mode = Mode::Config;
            }
            (Mode::Config | Mode::ConfigVlan(_), "end") => mode = Mode::Privileged,
            (Mode::Config | Mode::ConfigVlan(_), command) if command.starts_with("vlan ") => {
                match command[5..].parse::<u32>() {
                    Ok(id) if !options.reject.contains(&id) => {
                        state
                            .lock()
                            .unwrap()
                            .vlans
                            .entry(id)
                            .or_insert_with(|| (format!("VLAN{id:04}"), String::new()));
                        mode = Mode::ConfigVlan(id);
                    }
                    _ => {
                        reply.push_str("         ^\r\n% Invalid input detected at '^' marker.\r\n");
                    }
                }
            }
            (Mode::ConfigVlan(id), command) if command.starts_with("name ") => {
                if let Some(vlan) = state.lock().unwrap().vlans.get_mut(&id) {
                    vlan.0 = command[5..].to_string();
                }
            }
            (Mode::ConfigVlan(id), command) if command.starts_with("description ") => {
                if let Some(vlan) = state.lock().unwrap().vlans.get_mut(&id) {
                    vlan.1 = command[12..].to_string();
                }
            }
            (Mode::ConfigVlan(id), "no description") => {
                if let Some(vlan) = state.lock().unwrap().vlans.get_mut(&id) {
                    vlan.1.clear();
                }
            }
            _ => reply.push_str("% Invalid input detected at '^' marker.\r\n"),
        }

        reply.push_str(prompt(mode));
        say(&mut writer, &reply).await;
    }
}
