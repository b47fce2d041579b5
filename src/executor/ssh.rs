use std::path::Path;

use crate::error::Result;
use crate::models::Server;
use crate::scripts::{self, ScriptParser, ScriptTokens};

/// Connection details for one remote invocation.
#[derive(Debug, Clone, Copy)]
pub struct SshTarget<'a> {
    pub private_key: &'a Path,
    pub username: &'a str,
    pub port: u16,
    pub address: &'a str,
}

impl<'a> SshTarget<'a> {
    pub fn for_server(
        server: &'a Server,
        private_key: &'a Path,
        username: Option<&'a str>,
    ) -> Self {
        Self {
            private_key,
            username: username.unwrap_or(server.username.as_str()),
            port: server.port,
            address: &server.ip_address,
        }
    }

    pub fn tokens(&self) -> ScriptTokens {
        let mut tokens = ScriptTokens::new();
        tokens
            .insert("private_key", self.private_key.to_string_lossy())
            .insert("username", self.username)
            .insert("port", self.port.to_string())
            .insert("ip_address", self.address);
        tokens
    }
}

/// An SSH invocation and the script it feeds to the remote shell on stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteScript {
    pub command: String,
    pub script: String,
}

/// Prefixes the fail-fast directive (and the trace directive when
/// `verbose`) and pairs the script with the SSH command that runs it.
///
/// The script never becomes part of the local command line.
pub fn wrap_script(
    parser: &ScriptParser,
    target: &SshTarget<'_>,
    script: &str,
    verbose: bool,
) -> Result<RemoteScript> {
    let mut body = String::from("set -e\n");
    if verbose {
        body.push_str("set -v\n");
    }
    body.push_str(script);
    body.push('\n');

    let command = parser.render(scripts::RUN_OVER_SSH, &target.tokens())?;
    Ok(RemoteScript {
        command: command.trim_end().to_string(),
        script: body,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server() -> Server {
        Server {
            id: "s1".to_string(),
            project_id: "p1".to_string(),
            name: "web-1".to_string(),
            ip_address: "10.0.0.5".to_string(),
            port: 2222,
            username: "deploy".to_string(),
            path: "/var/www/app/".to_string(),
            deploy_code: true,
            position: 0,
        }
    }

    #[test]
    fn wraps_script_with_fail_fast_and_connection_details() {
        let server = server();
        let key = Path::new("/tmp/sshkey123");
        let target = SshTarget::for_server(&server, key, None);

        let remote = wrap_script(&ScriptParser::new(), &target, "echo hi", false).unwrap();

        assert!(remote.command.contains("-p 2222"));
        assert!(remote.command.contains("-i /tmp/sshkey123"));
        assert!(remote.command.contains("deploy@10.0.0.5 'bash -s'"));
        assert!(!remote.command.contains("echo hi"));
        assert_eq!(remote.script, "set -e\necho hi\n");
    }

    #[test]
    fn verbose_adds_trace_directive_and_user_override_wins() {
        let server = server();
        let key = Path::new("/tmp/sshkey123");
        let target = SshTarget::for_server(&server, key, Some("www-data"));

        let remote = wrap_script(&ScriptParser::new(), &target, "ls", true).unwrap();

        assert_eq!(remote.script, "set -e\nset -v\nls\n");
        assert!(remote.command.contains("www-data@10.0.0.5"));
    }

    #[tokio::test]
    async fn variable_values_never_run_on_the_local_host() {
        use crate::executor::{CollectingSink, CommandRunner, ProcessExecutor, RunOutcome};
        use crate::scripts::shell::quote_arg;

        let server = server();
        let key = Path::new("/tmp/sshkey123");
        let target = SshTarget::for_server(&server, key, None);
        let value = "x\nEOF\nDEPLOYER_SCRIPT_EOF\necho LOCAL_ESCAPE #";
        let script = format!("export APP_ENV={}\necho done", quote_arg(value));
        let remote = wrap_script(&ScriptParser::new(), &target, &script, false).unwrap();
        assert!(!remote.command.contains("LOCAL_ESCAPE"));

        // Stands in for ssh: swallows the script and reports where it ran.
        let command = format!("ssh() {{ cat > /dev/null; echo remote; }}\n{}", remote.command);
        let mut sink = CollectingSink::new();
        let outcome = ProcessExecutor::new("sh")
            .run_with_input(&command, Some(&remote.script), &mut sink)
            .await
            .unwrap();

        assert_eq!(outcome, RunOutcome::Succeeded);
        assert_eq!(sink.stdout(), "remote");
        assert_eq!(sink.stderr(), "");
    }
}
