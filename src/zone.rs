//! Master zone-file loader (RFC 1035 §5) and /etc/hosts loader.
//! Both populate the cache with user-supplied records.

use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

use crate::cache::RrCache;
use crate::records::ResourceRecord;
use crate::text::{self, TextParseError};

/// TTL given to records synthesized from /etc/hosts. The entries are
/// user-locked anyway, so the value only shows up on the wire.
const HOSTS_TTL: u32 = 1000;

#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("{file}: {source}")]
    Io {
        file: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{file}:{line}: {source}")]
    Parse {
        file: String,
        line: usize,
        #[source]
        source: TextParseError,
    },
    #[error("{file}:{line}: mismatched ')'")]
    UnbalancedParen { file: String, line: usize },
    #[error("{file}:{line}: ${directive} needs an argument")]
    BadDirective {
        file: String,
        line: usize,
        directive: String,
    },
    #[error("{file}:{line}: unknown control entry ${directive}")]
    UnknownDirective {
        file: String,
        line: usize,
        directive: String,
    },
    #[error("{file}:{line}: cannot parse host address")]
    BadHostAddress { file: String, line: usize },
}

/// Parse a master zone file into the cache.
///
/// Every record is inserted as authoritative and marked user-supplied.
/// `$ORIGIN <name>` changes the origin for subsequent lines; `$INCLUDE
/// <file>` pulls in another file, resolved relative to the including one.
/// Parenthesised records span physical lines. Returns the number of
/// records loaded.
pub fn load_zone(
    cache: &mut RrCache,
    path: &Path,
    default_origin: &str,
    now: u64,
) -> Result<usize, LoaderError> {
    let mut parser = ZoneParser {
        origin: default_origin.to_string(),
        last_owner: None,
        now,
        loaded: 0,
    };
    parser.load_file(cache, path)?;
    Ok(parser.loaded)
}

struct ZoneParser {
    origin: String,
    last_owner: Option<String>,
    now: u64,
    loaded: usize,
}

impl ZoneParser {
    fn load_file(&mut self, cache: &mut RrCache, path: &Path) -> Result<(), LoaderError> {
        let file = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|source| LoaderError::Io {
            file: file.clone(),
            source,
        })?;

        let mut unit = String::new();
        let mut unit_line = 0;
        let mut depth: i32 = 0;
        for (index, raw_line) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = match raw_line.find(';') {
                Some(pos) => &raw_line[..pos],
                None => raw_line,
            };
            if unit.is_empty() {
                unit_line = line_no;
                unit.push_str(line);
            } else {
                unit.push(' ');
                unit.push_str(line.trim_start());
            }
            for c in line.chars() {
                match c {
                    '(' => depth += 1,
                    ')' => depth -= 1,
                    _ => {}
                }
            }
            if depth < 0 {
                return Err(LoaderError::UnbalancedParen {
                    file,
                    line: line_no,
                });
            }
            if depth > 0 {
                // record continues on the next physical line
                continue;
            }
            let complete = std::mem::take(&mut unit);
            self.process_unit(cache, &complete, unit_line, path, &file)?;
        }
        if depth > 0 {
            warn!("{}: unclosed '(' at end of file; trailing record dropped", file);
        }
        Ok(())
    }

    fn process_unit(
        &mut self,
        cache: &mut RrCache,
        unit: &str,
        line: usize,
        path: &Path,
        file: &str,
    ) -> Result<(), LoaderError> {
        let trimmed = unit.trim();
        if trimmed.is_empty() {
            return Ok(());
        }

        if let Some(entry) = trimmed.strip_prefix('$') {
            let mut parts = entry.split_whitespace();
            let directive = parts.next().unwrap_or_default().to_string();
            let argument = parts.next();
            if directive.eq_ignore_ascii_case("origin") {
                let name = argument.ok_or_else(|| LoaderError::BadDirective {
                    file: file.to_string(),
                    line,
                    directive: directive.clone(),
                })?;
                self.origin = name.to_string();
            } else if directive.eq_ignore_ascii_case("include") {
                let name = argument.ok_or_else(|| LoaderError::BadDirective {
                    file: file.to_string(),
                    line,
                    directive: directive.clone(),
                })?;
                let included = resolve_relative(path, name);
                self.load_file(cache, &included)?;
            } else {
                return Err(LoaderError::UnknownDirective {
                    file: file.to_string(),
                    line,
                    directive,
                });
            }
            return Ok(());
        }

        match text::parse_record_line(unit, self.last_owner.as_deref(), &self.origin) {
            Ok(Some(rr)) => {
                let id = cache.insert(&rr, true, self.now);
                cache.mark_user(id);
                self.last_owner = Some(rr.owner);
                self.loaded += 1;
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(source) => Err(LoaderError::Parse {
                file: file.to_string(),
                line,
                source,
            }),
        }
    }
}

/// Included paths are taken relative to the including file's directory
/// unless absolute.
fn resolve_relative(base_file: &Path, name: &str) -> PathBuf {
    let candidate = Path::new(name);
    if candidate.is_absolute() {
        return candidate.to_path_buf();
    }
    match base_file.parent() {
        Some(dir) => dir.join(candidate),
        None => candidate.to_path_buf(),
    }
}

/// Process one `/etc/hosts` line: `ip canonical-name alias...` (RFC 952).
/// The canonical name becomes an A record and each alias a CNAME to it,
/// all user-supplied. Comment lines, blank lines, and IPv6 entries are
/// skipped. Returns false when the address field does not parse.
pub fn parse_hosts_line(cache: &mut RrCache, line: &str, now: u64) -> bool {
    let trimmed = line.trim_start();
    if trimmed.is_empty() || trimmed.starts_with('#') {
        return true;
    }
    // IPv6 hosts entries are out of scope; skipping them is the intended
    // behavior, not a gap.
    if trimmed.contains("::") {
        return true;
    }

    let mut tokens = trimmed.split_whitespace();
    let Some(address) = tokens.next() else {
        return true;
    };
    let Ok(ip) = address.parse::<Ipv4Addr>() else {
        return false;
    };
    let Some(canonical) = tokens.next() else {
        return false;
    };

    let id = cache.insert(&ResourceRecord::a(canonical, ip, HOSTS_TTL), false, now);
    cache.mark_user(id);
    for alias in tokens {
        let id = cache.insert(
            &ResourceRecord::cname(alias, canonical, HOSTS_TTL),
            false,
            now,
        );
        cache.mark_user(id);
    }
    true
}

/// Process an `/etc/hosts` file. With `may_be_missing`, a file that does
/// not exist is silently treated as empty.
pub fn load_hosts(
    cache: &mut RrCache,
    path: &Path,
    may_be_missing: bool,
    now: u64,
) -> Result<(), LoaderError> {
    let file = path.display().to_string();
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(source) if may_be_missing && source.kind() == std::io::ErrorKind::NotFound => {
            return Ok(());
        }
        Err(source) => return Err(LoaderError::Io { file, source }),
    };
    for (index, line) in content.lines().enumerate() {
        if !parse_hosts_line(cache, line, now) {
            return Err(LoaderError::BadHostAddress {
                file,
                line: index + 1,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEREF_CNAMES;
    use crate::records::{RData, RecordClass, RecordType};
    use std::io::Write;

    const NOW: u64 = 1_000_000;

    fn write_file(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_load_zone_basic() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "zone",
            "fun.house 10000 IN A 1.2.3.4\n\
             \t10000 IN MX 10 mail.fun.house ; same owner\n\
             ; whole-line comment\n\
             extra.fun 300 IN CNAME fun.house\n",
        );
        let mut cache = RrCache::new(1 << 20, 1024);
        let loaded = load_zone(&mut cache, &path, "", NOW).unwrap();
        assert_eq!(loaded, 3);

        let id = cache
            .lookup_one("fun.house", RecordType::A, RecordClass::Internet, 0)
            .unwrap();
        assert_eq!(cache.record(id).unwrap().rdata, RData::A(Ipv4Addr::new(1, 2, 3, 4)));
        // the indented MX line reused the previous owner
        assert!(cache
            .lookup_one("fun.house", RecordType::MX, RecordClass::Internet, 0)
            .is_some());
        assert_eq!(cache.get_addr("extra.fun"), Some(Ipv4Addr::new(1, 2, 3, 4)));
    }

    #[test]
    fn test_zone_records_are_user_locked() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "zone", "pinned.example 10 IN A 9.9.9.9\n");
        let mut cache = RrCache::new(1 << 20, 1024);
        load_zone(&mut cache, &path, "", NOW).unwrap();

        // survives expiry and cannot be displaced by later data
        cache.flush(NOW + 1_000_000);
        let id = cache
            .lookup_one("pinned.example", RecordType::A, RecordClass::Internet, 0)
            .unwrap();
        assert_eq!(cache.record(id).unwrap().rdata, RData::A(Ipv4Addr::new(9, 9, 9, 9)));
    }

    #[test]
    fn test_origin_and_include() {
        let dir = tempfile::tempdir().unwrap();
        write_file(dir.path(), "sub.zone", "www 60 IN A 10.0.0.2\n");
        let main = write_file(
            dir.path(),
            "main.zone",
            "$ORIGIN example.com.\n\
             mail 60 IN A 10.0.0.1\n\
             $INCLUDE sub.zone\n",
        );
        let mut cache = RrCache::new(1 << 20, 1024);
        let loaded = load_zone(&mut cache, &main, "", NOW).unwrap();
        assert_eq!(loaded, 2);
        assert_eq!(cache.get_addr("mail.example.com"), Some(Ipv4Addr::new(10, 0, 0, 1)));
        // the include inherits the $ORIGIN in effect
        assert_eq!(cache.get_addr("www.example.com"), Some(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn test_multiline_soa() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "zone",
            "example.com. 3600 IN SOA ns1.example.com. host.example.com. (\n\
             \t2024010101 ; serial\n\
             \t2h 15m 2w 1h )\n",
        );
        let mut cache = RrCache::new(1 << 20, 1024);
        assert_eq!(load_zone(&mut cache, &path, "", NOW).unwrap(), 1);
        let id = cache
            .lookup_one("example.com", RecordType::SOA, RecordClass::Internet, 0)
            .unwrap();
        match &cache.record(id).unwrap().rdata {
            RData::SOA { serial, minimum, .. } => {
                assert_eq!(*serial, 2024010101);
                assert_eq!(*minimum, 3600);
            }
            other => panic!("expected SOA, got {:?}", other),
        }
    }

    #[test]
    fn test_mismatched_paren_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "zone", "x.example 60 IN A 1.2.3.4 )\n");
        let mut cache = RrCache::new(1 << 20, 1024);
        assert!(matches!(
            load_zone(&mut cache, &path, "", NOW),
            Err(LoaderError::UnbalancedParen { line: 1, .. })
        ));
    }

    #[test]
    fn test_parse_error_carries_file_and_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "zone",
            "good.example 60 IN A 1.2.3.4\nbad.example 60 IN A not-an-ip\n",
        );
        let mut cache = RrCache::new(1 << 20, 1024);
        match load_zone(&mut cache, &path, "", NOW) {
            Err(LoaderError::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_directive() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(dir.path(), "zone", "$GENERATE 1-10 host-$ A 1.2.3.4\n");
        let mut cache = RrCache::new(1 << 20, 1024);
        assert!(matches!(
            load_zone(&mut cache, &path, "", NOW),
            Err(LoaderError::UnknownDirective { .. })
        ));
    }

    #[test]
    fn test_hosts_line() {
        let mut cache = RrCache::new(1 << 20, 1024);
        assert!(parse_hosts_line(
            &mut cache,
            "192.168.0.7 router.lan gateway gw",
            NOW
        ));
        assert_eq!(cache.get_addr("router.lan"), Some(Ipv4Addr::new(192, 168, 0, 7)));
        // aliases resolve through their CNAMEs
        assert_eq!(cache.get_addr("gateway"), Some(Ipv4Addr::new(192, 168, 0, 7)));
        assert_eq!(cache.get_addr("gw"), Some(Ipv4Addr::new(192, 168, 0, 7)));
        let id = cache
            .lookup_one("gw", RecordType::CNAME, RecordClass::Internet, 0)
            .unwrap();
        assert_eq!(cache.record(id).unwrap().rdata, RData::CNAME("router.lan".to_string()));
    }

    #[test]
    fn test_hosts_skips_comments_and_ipv6() {
        let mut cache = RrCache::new(1 << 20, 1024);
        assert!(parse_hosts_line(&mut cache, "# comment", NOW));
        assert!(parse_hosts_line(&mut cache, "", NOW));
        assert!(parse_hosts_line(&mut cache, "::1 localhost", NOW));
        assert!(parse_hosts_line(&mut cache, "fe80::1 router", NOW));
        assert!(cache.is_empty());
        assert!(!parse_hosts_line(&mut cache, "not-an-ip host", NOW));
    }

    #[test]
    fn test_load_hosts_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "hosts",
            "127.0.0.1 localhost\n10.0.0.5 fileserver files\n",
        );
        let mut cache = RrCache::new(1 << 20, 1024);
        load_hosts(&mut cache, &path, false, NOW).unwrap();
        assert_eq!(cache.get_addr("localhost"), Some(Ipv4Addr::new(127, 0, 0, 1)));
        assert_eq!(cache.get_addr("files"), Some(Ipv4Addr::new(10, 0, 0, 5)));

        // hosts entries shrug off later "better" data
        cache.insert(
            &ResourceRecord::a("localhost", Ipv4Addr::new(6, 6, 6, 6), 1000),
            true,
            NOW,
        );
        let ids = cache.lookup_list("localhost", RecordType::A, RecordClass::Internet);
        assert!(ids.iter().any(|&id| {
            cache.record(id).map(|rr| rr.rdata == RData::A(Ipv4Addr::new(127, 0, 0, 1)))
                == Some(true)
        }));
    }

    #[test]
    fn test_load_hosts_missing() {
        let mut cache = RrCache::new(1 << 20, 1024);
        let missing = Path::new("/definitely/not/here/hosts");
        assert!(load_hosts(&mut cache, missing, true, NOW).is_ok());
        assert!(load_hosts(&mut cache, missing, false, NOW).is_err());
    }

    #[test]
    fn test_lookup_one_with_deref_from_zone() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(
            dir.path(),
            "zone",
            "fun.house 10000 IN CNAME extra.fun\nextra.fun 10000 IN A 2.3.4.5\n",
        );
        let mut cache = RrCache::new(1 << 20, 1024);
        load_zone(&mut cache, &path, "", NOW).unwrap();
        let id = cache
            .lookup_one("fun.house", RecordType::A, RecordClass::Internet, DEREF_CNAMES)
            .unwrap();
        assert_eq!(cache.record(id).unwrap().rdata, RData::A(Ipv4Addr::new(2, 3, 4, 5)));
    }
}
