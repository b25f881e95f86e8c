use crate::fs::dir::Perm;
use crate::syscalls::{perror, s_chmod, s_perm, s_write};

/// chmod (+|-)[rwx]+ file: grant or revoke permission bits.
pub fn run(argv: &[String]) {
    let (Some(perms), Some(file)) = (argv.get(1), argv.get(2)) else {
        let _ = s_write(1, b"Usage: chmod (+|-)rwx file\n");
        return;
    };
    let Some((grant, mask)) = parse_perms(perms) else {
        let _ = s_write(1, b"Usage: chmod (+|-)rwx file\n");
        return;
    };
    // Compute the exact delta so that re-granting an existing bit is a
    // no-op rather than an out-of-range sum.
    let current = match s_perm(file) {
        Ok(perm) => perm,
        Err(_) => {
            perror("chmod");
            return;
        }
    };
    let target = if grant {
        current | mask
    } else {
        current & !mask
    };
    let delta = target.bits() as i32 - current.bits() as i32;
    if delta != 0 {
        if s_chmod(file, delta).is_err() {
            perror("chmod");
        }
    }
}

fn parse_perms(perms: &str) -> Option<(bool, Perm)> {
    let (grant, rest) = match perms.strip_prefix('+') {
        Some(rest) => (true, rest),
        None => (false, perms.strip_prefix('-')?),
    };
    if rest.is_empty() {
        return None;
    }
    let mut mask = Perm::empty();
    for c in rest.chars() {
        mask |= match c {
            'r' => Perm::READ,
            'w' => Perm::WRITE,
            'x' => Perm::EXEC,
            _ => return None,
        };
    }
    Some((grant, mask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perm_string_parsing() {
        assert_eq!(parse_perms("+rw"), Some((true, Perm::READ | Perm::WRITE)));
        assert_eq!(parse_perms("-x"), Some((false, Perm::EXEC)));
        assert_eq!(parse_perms("rw"), None);
        assert_eq!(parse_perms("+q"), None);
        assert_eq!(parse_perms("+"), None);
    }
}
