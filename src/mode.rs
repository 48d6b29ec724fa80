//! Installer mode selection.
//!
//! The installer decides once, from its arguments, whether it installs or
//! uninstalls. The result is a plain value passed into the selected flow.
//!
//! Program lists launch uninstallers with Windows-style switches, so
//! `/uninstall`, `/productcode=X` and `/quiet` are rewritten to their
//! `--` forms before clap sees them.

/// What the installer executable was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallerMode {
    /// Deploy the embedded application.
    Install {
        /// Product code overriding the one stored in the payload.
        product_code: Option<String>,
    },
    /// Remove a previously installed application.
    Uninstall {
        /// Product code of the installation to remove.
        product_code: String,
    },
}

impl InstallerMode {
    /// Select the mode from parsed flags.
    ///
    /// `uninstall` is the value of `--uninstall` (`Some("")` when the flag
    /// had no value); `product_code` is the value of `--productcode`.
    pub fn select(
        uninstall: Option<&str>,
        product_code: Option<&str>,
    ) -> std::result::Result<Self, String> {
        let product_code = product_code.map(str::trim).filter(|c| !c.is_empty());
        match uninstall.map(str::trim) {
            None => Ok(InstallerMode::Install {
                product_code: product_code.map(str::to_string),
            }),
            Some(code) if !code.is_empty() => {
                if let Some(other) = product_code {
                    if other != code {
                        return Err(format!(
                            "conflicting product codes: '{}' and '{}'",
                            code, other
                        ));
                    }
                }
                Ok(InstallerMode::Uninstall {
                    product_code: code.to_string(),
                })
            }
            Some(_) => product_code
                .map(|code| InstallerMode::Uninstall {
                    product_code: code.to_string(),
                })
                .ok_or_else(|| "uninstall requires a product code".to_string()),
        }
    }

    /// Whether this is an uninstall run.
    pub fn is_uninstall(&self) -> bool {
        matches!(self, InstallerMode::Uninstall { .. })
    }
}

/// Rewrite Windows-style switches into clap's `--flag` syntax.
///
/// The first argument (program name) is passed through untouched.
pub fn normalize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut iter = args.into_iter();
    let mut out: Vec<String> = iter.next().into_iter().collect();

    for arg in iter {
        let Some(rest) = arg.strip_prefix('/') else {
            out.push(arg);
            continue;
        };
        let (name, value) = match rest.split_once(['=', ':']) {
            Some((name, value)) => (name, Some(value)),
            None => (rest, None),
        };
        match name.to_ascii_lowercase().as_str() {
            "uninstall" | "x" => {
                out.push("--uninstall".to_string());
                if let Some(value) = value {
                    out.push(value.to_string());
                }
            }
            "productcode" => {
                out.push("--productcode".to_string());
                if let Some(value) = value {
                    out.push(value.to_string());
                }
            }
            "quiet" | "q" | "silent" => out.push("--quiet".to_string()),
            // Absolute unix paths and anything unknown stay as they are.
            _ => out.push(arg),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_normalize_windows_switches() {
        assert_eq!(
            normalize_args(args(&["setup.exe", "/uninstall", "{ABC}"])),
            args(&["setup.exe", "--uninstall", "{ABC}"])
        );
        assert_eq!(
            normalize_args(args(&["setup.exe", "/Uninstall", "/productcode={ABC}", "/quiet"])),
            args(&["setup.exe", "--uninstall", "--productcode", "{ABC}", "--quiet"])
        );
        assert_eq!(
            normalize_args(args(&["setup.exe", "/x:{ABC}"])),
            args(&["setup.exe", "--uninstall", "{ABC}"])
        );
    }

    #[test]
    fn test_normalize_leaves_other_args() {
        assert_eq!(
            normalize_args(args(&["/opt/setup", "--productcode=shop", "--target", "/srv/shop"])),
            args(&["/opt/setup", "--productcode=shop", "--target", "/srv/shop"])
        );
    }

    #[test]
    fn test_select_install() {
        assert_eq!(
            InstallerMode::select(None, None).unwrap(),
            InstallerMode::Install { product_code: None }
        );
        assert_eq!(
            InstallerMode::select(None, Some("shop")).unwrap(),
            InstallerMode::Install {
                product_code: Some("shop".to_string())
            }
        );
    }

    #[test]
    fn test_select_uninstall() {
        let expected = InstallerMode::Uninstall {
            product_code: "shop".to_string(),
        };
        assert_eq!(InstallerMode::select(Some("shop"), None).unwrap(), expected);
        assert_eq!(InstallerMode::select(Some(""), Some("shop")).unwrap(), expected);
        assert_eq!(
            InstallerMode::select(Some("shop"), Some("shop")).unwrap(),
            expected
        );
        assert!(expected.is_uninstall());
    }

    #[test]
    fn test_select_uninstall_errors() {
        assert!(InstallerMode::select(Some(""), None).is_err());
        assert!(InstallerMode::select(Some("a"), Some("b")).is_err());
    }
}
