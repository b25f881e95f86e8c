//! User commands. Each runs as the body of a spawned process and talks to
//! the kernel exclusively through the system-call surface.

pub mod busy;
pub mod cat;
pub mod chmod;
pub mod cp;
pub mod echo;
pub mod kill;
pub mod ls;
pub mod mv;
pub mod orphanify;
pub mod ps;
pub mod rm;
pub mod sleep;
pub mod stress;
pub mod touch;
pub mod zombify;

pub type CommandFn = fn(&[String]);

const COMMANDS: &[(&str, CommandFn)] = &[
    ("busy", busy::run),
    ("cat", cat::run),
    ("chmod", chmod::run),
    ("cp", cp::run),
    ("echo", echo::run),
    ("hang", stress::hang),
    ("kill", kill::run),
    ("ls", ls::run),
    ("mv", mv::run),
    ("nohang", stress::nohang),
    ("orphanify", orphanify::run),
    ("ps", ps::run),
    ("recur", stress::recur),
    ("rm", rm::run),
    ("sleep", sleep::run),
    ("touch", touch::run),
    ("zombify", zombify::run),
];

pub fn lookup(name: &str) -> Option<CommandFn> {
    COMMANDS
        .iter()
        .find(|(cmd, _)| *cmd == name)
        .map(|(_, f)| *f)
}

pub fn names() -> impl Iterator<Item = &'static str> {
    COMMANDS.iter().map(|(name, _)| *name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_known_and_unknown() {
        assert!(lookup("cat").is_some());
        assert!(lookup("frobnicate").is_none());
    }
}
