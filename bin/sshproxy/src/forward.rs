//! Parses the `-L [laddr:]lport:saddr:sport` forward specification from
//! spec §6.3, the same shape `ssh-proxy.c`'s `parse_forward` accepts.

use std::net::{SocketAddr, ToSocketAddrs};

use eyre::{bail, Context, Result};

pub struct ForwardSpec {
    pub listen_host: String,
    pub listen_port: u16,
    pub connect_host: String,
    pub connect_port: u16,
}

impl ForwardSpec {
    /// Accepts either `lport:saddr:sport` (listen address defaults to
    /// `0.0.0.0`, as `ssh-proxy.c`'s `main` does when `fwd.listen_host` is
    /// unset) or `laddr:lport:saddr:sport`.
    pub fn parse(spec: &str) -> Result<Self> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (listen_host, listen_port, connect_host, connect_port) = match parts.as_slice() {
            [lport, saddr, sport] => ("0.0.0.0", *lport, *saddr, *sport),
            [laddr, lport, saddr, sport] => (*laddr, *lport, *saddr, *sport),
            _ => bail!("cannot parse forward specification: {spec:?}"),
        };
        let listen_port: u16 = listen_port
            .parse()
            .with_context(|| format!("invalid listen port in forward spec {spec:?}"))?;
        let connect_port: u16 = connect_port
            .parse()
            .with_context(|| format!("invalid connect port in forward spec {spec:?}"))?;
        Ok(Self {
            listen_host: listen_host.to_owned(),
            listen_port,
            connect_host: connect_host.to_owned(),
            connect_port,
        })
    }

    pub fn listen_addr(&self) -> Result<SocketAddr> {
        resolve(&self.listen_host, self.listen_port)
    }

    pub fn connect_addr(&self) -> Result<SocketAddr> {
        resolve(&self.connect_host, self.connect_port)
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr> {
    (host, port)
        .to_socket_addrs()
        .with_context(|| format!("resolving {host}:{port}"))?
        .next()
        .ok_or_else(|| eyre::eyre!("{host}:{port} resolved to no addresses"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_three_part_spec_with_default_listen_host() {
        let fwd = ForwardSpec::parse("2222:127.0.0.1:22").unwrap();
        assert_eq!(fwd.listen_host, "0.0.0.0");
        assert_eq!(fwd.listen_port, 2222);
        assert_eq!(fwd.connect_host, "127.0.0.1");
        assert_eq!(fwd.connect_port, 22);
    }

    #[test]
    fn parses_four_part_spec() {
        let fwd = ForwardSpec::parse("127.0.0.1:2222:10.0.0.1:22").unwrap();
        assert_eq!(fwd.listen_host, "127.0.0.1");
        assert_eq!(fwd.listen_port, 2222);
        assert_eq!(fwd.connect_host, "10.0.0.1");
        assert_eq!(fwd.connect_port, 22);
    }

    #[test]
    fn rejects_malformed_spec() {
        assert!(ForwardSpec::parse("not-a-forward-spec").is_err());
    }

    #[test]
    fn resolves_numeric_addresses() {
        let fwd = ForwardSpec::parse("2222:127.0.0.1:22").unwrap();
        assert_eq!(fwd.connect_addr().unwrap(), "127.0.0.1:22".parse().unwrap());
    }
}
