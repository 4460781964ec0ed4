//! Transport factory: remote descriptor in, unconnected transport out.
//!
//! Validation happens here, before any I/O. An unknown transport string or a
//! reserved-but-unimplemented kind is a [`SyncError::Config`].

use agora_core::{AgentId, ConfigError, RemoteDescriptor, SyncRemote, TransportKind};

use crate::error::SyncError;
use crate::transport::{GitRemoteTransport, LocalTransport, Transport};

/// Build a transport for `remote`. `agent` authors git commits.
pub fn create_transport(
    remote: &SyncRemote,
    agent: &AgentId,
) -> Result<Box<dyn Transport>, SyncError> {
    match remote.kind {
        TransportKind::LocalFs => Ok(Box::new(LocalTransport::new())),
        TransportKind::GitRemote => Ok(Box::new(GitRemoteTransport::new(agent.clone()))),
        TransportKind::Http => Err(ConfigError::NotImplemented(remote.kind.to_string()).into()),
    }
}

/// Validate a raw descriptor, then build its transport.
pub fn create_transport_from(
    descriptor: &RemoteDescriptor,
    agent: &AgentId,
) -> Result<(SyncRemote, Box<dyn Transport>), SyncError> {
    let remote = SyncRemote::try_from(descriptor.clone())?;
    let transport = create_transport(&remote, agent)?;
    Ok((remote, transport))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use rstest::rstest;

    fn descriptor(transport: &str) -> RemoteDescriptor {
        RemoteDescriptor {
            transport: transport.into(),
            url: "/tmp/somewhere".into(),
            branch: None,
        }
    }

    #[rstest]
    #[case("local-fs", TransportKind::LocalFs)]
    #[case("git-remote", TransportKind::GitRemote)]
    fn known_kinds_build_matching_transport(#[case] transport: &str, #[case] kind: TransportKind) {
        let (remote, built) = create_transport_from(&descriptor(transport), &AgentId::from("agora"))
            .expect("known transport");
        assert_eq!(remote.kind, kind);
        assert_eq!(built.kind(), kind);
    }

    #[rstest]
    #[case("http")]
    #[case("ftp")]
    #[case("")]
    fn unknown_or_reserved_kinds_are_config_errors(#[case] transport: &str) {
        let err = create_transport_from(&descriptor(transport), &AgentId::from("agora"))
            .err()
            .expect("must fail");
        assert_eq!(err.kind(), ErrorKind::Config);
    }

    #[test]
    fn empty_url_is_rejected_before_io() {
        let desc = RemoteDescriptor {
            transport: "local-fs".into(),
            url: "  ".into(),
            branch: None,
        };
        let err = create_transport_from(&desc, &AgentId::from("agora"))
            .err()
            .expect("must fail");
        assert!(matches!(err, SyncError::Config(ConfigError::EmptyUrl)));
    }
}
