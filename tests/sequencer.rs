use std::cell::RefCell;
use std::collections::HashMap;
use std::io::Read;
use std::rc::Rc;

use rolecall::defaults::Defaults;
use rolecall::ssh::{Channel, ChannelEvent, Connector, Session, Tunnel, UploadOptions};
use rolecall::{
    CommandStep, ConnectionOptions, Delivery, Error, ErrorCode, Result, Sequence, SessionKey,
    TransferSpec, Verification,
};

#[derive(Default)]
struct Network {
    /// Every exec, upload and close, as "host: what".
    calls: Vec<String>,
    exit_codes: HashMap<(String, String), i32>,
    upload_error: Option<String>,
    /// Hosts whose sessions can no longer start commands.
    unreachable: Vec<String>,
    connects: usize,
    gateways_opened: usize,
    gateways_shut: usize,
    tunneled: usize,
}

type Shared = Rc<RefCell<Network>>;

struct FakeSession {
    host: String,
    network: Shared,
}

impl Session for FakeSession {
    fn host(&self) -> &str {
        &self.host
    }

    fn exec(&mut self, command: &str) -> Result<Channel<'_>> {
        let mut network = self.network.borrow_mut();
        network.calls.push(format!("{}: {}", self.host, command));
        if network.unreachable.contains(&self.host) {
            return Err(Error::ssh_transport(&self.host, "exec", "master connection is gone"));
        }
        let code = network
            .exit_codes
            .get(&(self.host.clone(), command.to_string()))
            .copied()
            .unwrap_or(0);

        Ok(Box::new(
            vec![
                ChannelEvent::Stdout(format!("ran {}\n", command).into_bytes()),
                ChannelEvent::Eof,
                ChannelEvent::ExitStatus(code),
            ]
            .into_iter(),
        ))
    }

    fn upload(
        &mut self,
        remote_path: &str,
        source: &mut dyn Read,
        _options: &UploadOptions,
    ) -> Result<u64> {
        let mut network = self.network.borrow_mut();
        network.calls.push(format!("{}: upload {}", self.host, remote_path));
        if let Some(error) = network.upload_error.clone() {
            return Err(Error::ssh_transport(&self.host, "upload", error));
        }

        let mut buf = Vec::new();
        source
            .read_to_end(&mut buf)
            .map_err(|e| Error::internal_io(e.to_string(), None))?;
        Ok(buf.len() as u64)
    }

    fn close(&mut self) -> Result<()> {
        self.network
            .borrow_mut()
            .calls
            .push(format!("{}: close", self.host));
        Ok(())
    }
}

struct FakeTunnel {
    network: Shared,
}

impl Tunnel for FakeTunnel {
    fn address(&self) -> &str {
        "gw.example.com"
    }

    fn connect(&mut self, key: &SessionKey) -> Result<Box<dyn Session>> {
        self.network.borrow_mut().tunneled += 1;
        Ok(Box::new(FakeSession {
            host: key.host.clone(),
            network: self.network.clone(),
        }))
    }

    fn shutdown(&mut self) -> Result<()> {
        self.network.borrow_mut().gateways_shut += 1;
        Ok(())
    }
}

struct FakeConnector {
    network: Shared,
}

impl Connector for FakeConnector {
    fn connect(&self, key: &SessionKey) -> Result<Box<dyn Session>> {
        self.network.borrow_mut().connects += 1;
        Ok(Box::new(FakeSession {
            host: key.host.clone(),
            network: self.network.clone(),
        }))
    }

    fn open_gateway(
        &self,
        _address: &str,
        _options: &ConnectionOptions,
    ) -> Result<Box<dyn Tunnel>> {
        self.network.borrow_mut().gateways_opened += 1;
        Ok(Box::new(FakeTunnel {
            network: self.network.clone(),
        }))
    }
}

fn app_role() -> Delivery {
    Delivery::new()
        .role("app", "a.example.com")
        .role("app", "b.example.com")
}

fn build(delivery: Delivery) -> (rolecall::CommandSequencer, Shared) {
    let network = Shared::default();
    let sequencer = delivery
        .build_with(
            Box::new(FakeConnector {
                network: network.clone(),
            }),
            &Defaults::default(),
        )
        .unwrap();
    (sequencer, network)
}

fn artifact() -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.tar.gz");
    std::fs::write(&path, b"artifact").unwrap();
    (dir, path)
}

fn calls(network: &Shared) -> Vec<String> {
    network.borrow().calls.clone()
}

#[test]
fn second_host_failure_stops_the_run() {
    let (_dir, source) = artifact();
    let (mut sequencer, network) = build(app_role());
    network
        .borrow_mut()
        .exit_codes
        .insert(("b.example.com".to_string(), "echo hi".to_string()), 1);

    let installer = Sequence::new("app")
        .command("echo hi")
        .transfer(TransferSpec::new(&source, "/opt/app.tar.gz"))
        .command("echo done");

    let err = sequencer.install(&installer, "app").unwrap_err();

    assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
    assert_eq!(err.host(), Some("b.example.com"));
    assert_eq!(err.details["package"], "app");
    assert_eq!(err.details["command"], "echo hi");
    assert_eq!(err.details["exitCode"], 1);
    assert_eq!(err.details["stdout"], "ran echo hi\n");
    assert_eq!(
        calls(&network),
        vec![
            "a.example.com: echo hi",
            "a.example.com: upload /opt/app.tar.gz",
            "a.example.com: echo done",
            "b.example.com: echo hi",
        ]
    );
}

#[test]
fn first_host_failure_never_reaches_later_hosts() {
    let (mut sequencer, network) = build(app_role());
    network
        .borrow_mut()
        .exit_codes
        .insert(("a.example.com".to_string(), "make".to_string()), 2);

    let err = sequencer
        .install(&Sequence::new("app").command("make"), "app")
        .unwrap_err();

    assert_eq!(err.host(), Some("a.example.com"));
    assert_eq!(network.borrow().connects, 1);
    assert!(calls(&network).iter().all(|c| !c.starts_with("b.example.com")));
}

#[test]
fn sudo_is_applied_to_commands_only() {
    let (_dir, source) = artifact();
    let (mut sequencer, network) = build(app_role().use_sudo(true));

    let installer = Sequence::new("app")
        .command("apt-get install x")
        .command("sudo apt-get install y")
        .transfer(TransferSpec::new(&source, "/opt/"));

    sequencer.install(&installer, "app").unwrap();

    let calls = calls(&network);
    assert_eq!(calls[0], "a.example.com: sudo apt-get install x");
    assert_eq!(calls[1], "a.example.com: sudo apt-get install y");
    assert_eq!(calls[2], "a.example.com: upload /opt/app.tar.gz");
}

#[test]
fn verify_turns_failures_into_false() {
    let (mut sequencer, network) = build(app_role());
    network.borrow_mut().exit_codes.insert(
        ("b.example.com".to_string(), "which nginx && nginx -t".to_string()),
        127,
    );

    let verification = Verification::new("nginx").check("which nginx").check("nginx -t");
    assert!(!sequencer.verify(&verification, "app").unwrap());

    network.borrow_mut().exit_codes.clear();
    assert!(sequencer.verify(&verification, "app").unwrap());
}

#[test]
fn verify_is_false_when_a_check_cannot_start() {
    let (mut sequencer, network) = build(app_role());
    network
        .borrow_mut()
        .unreachable
        .push("a.example.com".to_string());

    let verification = Verification::new("nginx").check("which nginx");
    assert!(!sequencer.verify(&verification, "app").unwrap());
    assert_eq!(calls(&network), vec!["a.example.com: which nginx"]);
}

#[test]
fn install_reports_a_dispatch_failure_as_command_failed() {
    let (mut sequencer, network) = build(app_role());
    network
        .borrow_mut()
        .unreachable
        .push("b.example.com".to_string());

    let err = sequencer
        .install(&Sequence::new("app").command("uptime"), "app")
        .unwrap_err();

    assert_eq!(err.code, ErrorCode::RemoteCommandFailed);
    assert_eq!(err.host(), Some("b.example.com"));
    assert_eq!(err.details["exitCode"], -1);
}

#[test]
fn verify_still_reports_unknown_roles() {
    let (mut sequencer, _network) = build(app_role());
    let err = sequencer
        .verify(&Verification::new("nginx").check("true"), "db")
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::RoleNotFound);
}

#[test]
fn sessions_are_reused_across_operations() {
    let (mut sequencer, network) = build(app_role().role("db", "a.example.com"));

    sequencer.install(&Sequence::new("one").command("true"), "app").unwrap();
    sequencer.install(&Sequence::new("two").command("true"), "db").unwrap();

    assert_eq!(network.borrow().connects, 2);
}

#[test]
fn reconnect_opens_a_fresh_session() {
    let (mut sequencer, network) = build(Delivery::new().role("app", "a.example.com"));

    let installer = Sequence::new("shell")
        .command("usermod -aG docker deploy")
        .reconnect()
        .command("docker ps");
    sequencer.install(&installer, "app").unwrap();

    assert_eq!(network.borrow().connects, 2);
    assert_eq!(
        calls(&network),
        vec![
            "a.example.com: usermod -aG docker deploy",
            "a.example.com: close",
            "a.example.com: docker ps",
        ]
    );
}

#[test]
fn permission_denied_upload_is_no_permission() {
    let (_dir, source) = artifact();
    let (mut sequencer, network) = build(app_role());
    network.borrow_mut().upload_error =
        Some("sh: 1: cannot create /usr/bin/app: Permission denied".to_string());

    let installer = Sequence::new("app")
        .transfer(TransferSpec::new(&source, "/usr/bin/app"))
        .command("echo done");
    let err = sequencer.install(&installer, "app").unwrap_err();

    assert_eq!(err.code, ErrorCode::TransferNoPermission);
    assert_eq!(err.host(), Some("a.example.com"));
    assert!(calls(&network).iter().all(|c| !c.contains("echo done")));
}

#[test]
fn missing_artifact_is_transfer_failed() {
    let dir = tempfile::tempdir().unwrap();
    let (mut sequencer, _network) = build(app_role());

    let installer =
        Sequence::new("app").transfer(TransferSpec::new(dir.path().join("gone"), "/opt/gone"));
    let err = sequencer.install(&installer, "app").unwrap_err();

    assert_eq!(err.code, ErrorCode::TransferFailed);
    assert_eq!(err.host(), Some("a.example.com"));
}

#[test]
fn gateway_routes_and_closes_sessions() {
    let (mut sequencer, network) = build(app_role().gateway("gw.example.com"));

    sequencer.install(&Sequence::new("app").command("uptime"), "app").unwrap();
    sequencer.install(&Sequence::new("app").command("uptime"), "app").unwrap();

    {
        let network = network.borrow();
        assert_eq!(network.gateways_opened, 1);
        assert_eq!(network.tunneled, 4);
        assert_eq!(network.connects, 0);
    }
    assert_eq!(
        calls(&network)
            .iter()
            .filter(|c| c.ends_with(": close"))
            .count(),
        4
    );

    sequencer.teardown().unwrap();
    sequencer.teardown().unwrap();
    drop(sequencer);
    assert_eq!(network.borrow().gateways_shut, 1);
}

#[test]
fn dropping_the_sequencer_shuts_the_gateway() {
    let (mut sequencer, network) = build(app_role().gateway("gw.example.com"));
    sequencer.install(&Sequence::new("app").command("uptime"), "app").unwrap();

    drop(sequencer);
    assert_eq!(network.borrow().gateways_shut, 1);
}

#[test]
fn raw_steps_are_accepted() {
    let (mut sequencer, network) = build(Delivery::new().role("app", "a.example.com"));

    let installer = Sequence::new("app").step(CommandStep::shell("echo raw"));
    sequencer.install(&installer, "app").unwrap();

    assert_eq!(calls(&network), vec!["a.example.com: echo raw"]);
}
