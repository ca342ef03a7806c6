//! Origin computation: the provenance descriptor attached to every file of
//! a `(repository, ref, start path)` triple. URLs are sanitized before they
//! get here; nothing in an origin may carry credentials.

use serde::Serialize;

use git::{LoadedRepository, PrivateMarker, Ref, RefKind};
use utils::giturl;

use crate::descriptor::ComponentDesc;
use crate::source::EditUrlSpec;

/// `worktree` is tri-state: the worktree path when files came from a
/// checked-out working tree, `false` for a ref read out of a local or bare
/// repository, and absent for a managed remote cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum WorktreeValue {
    Path(String),
    Absent(bool),
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Origin {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_url: Option<String>,
    pub gitdir: String,
    pub refname: String,
    pub reftype: RefKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    pub start_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refhash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worktree: Option<WorktreeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_uri_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edit_url_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private: Option<PrivateMarker>,
    pub descriptor: ComponentDesc,
}

pub fn compute_origin(
    repo: &LoadedRepository,
    r: &Ref,
    start_path: &str,
    edit_url: &EditUrlSpec,
    descriptor: ComponentDesc,
) -> Origin {
    let is_cache = repo.is_managed_cache();
    let web_url = is_cache.then(|| giturl::web_url(&repo.url));
    let worktree = match (&r.worktree_path, is_cache) {
        (Some(path), _) => Some(WorktreeValue::Path(path.display().to_string())),
        (None, true) => None,
        (None, false) => Some(WorktreeValue::Absent(false)),
    };
    let refhash = r.worktree_path.is_none().then(|| r.oid.clone());
    let file_uri_pattern = r.worktree_path.as_ref().map(|worktree| {
        if start_path.is_empty() {
            format!("file://{}/%s", worktree.display())
        } else {
            format!("file://{}/{start_path}/%s", worktree.display())
        }
    });
    let edit_url_pattern = edit_url_pattern(edit_url, web_url.as_deref(), r);
    Origin {
        kind: "git",
        url: repo.url.clone(),
        web_url,
        gitdir: repo.gitdir.display().to_string(),
        refname: r.shortname.clone(),
        reftype: r.kind,
        branch: (r.kind == RefKind::Branch).then(|| r.shortname.clone()),
        tag: (r.kind == RefKind::Tag).then(|| r.shortname.clone()),
        start_path: start_path.to_string(),
        refhash,
        worktree,
        remote: r.remote_name.clone(),
        file_uri_pattern,
        edit_url_pattern,
        private: repo.private,
        descriptor,
    }
}

/// The file-path token is `%s`; everything else substitutes immediately.
fn edit_url_pattern(spec: &EditUrlSpec, web_url: Option<&str>, r: &Ref) -> Option<String> {
    match spec {
        EditUrlSpec::Disabled => None,
        EditUrlSpec::Template(template) => Some(
            template
                .replace("{web_url}", web_url.unwrap_or_default())
                .replace("{refname}", &r.shortname)
                .replace("{refhash}", &r.oid)
                .replace(
                    "{branch}",
                    if r.kind == RefKind::Branch {
                        &r.shortname
                    } else {
                        ""
                    },
                )
                .replace(
                    "{tag}",
                    if r.kind == RefKind::Tag {
                        &r.shortname
                    } else {
                        ""
                    },
                )
                .replace("{path}", "%s"),
        ),
        EditUrlSpec::Default => {
            host_edit_pattern(web_url?, r.kind, &r.shortname)
        }
    }
}

/// Host-specific edit templates. Branches edit in place; tags can only be
/// browsed, so the hosts that distinguish them get the blob form.
fn host_edit_pattern(web_url: &str, reftype: RefKind, refname: &str) -> Option<String> {
    let host = web_url.split_once("://")?.1.split('/').next()?;
    let action = if reftype == RefKind::Tag { "blob" } else { "edit" };
    match host {
        "github.com" => Some(format!("{web_url}/{action}/{refname}/%s")),
        "gitlab.com" => Some(format!("{web_url}/-/{action}/{refname}/%s")),
        "bitbucket.org" => Some(format!("{web_url}/src/{refname}/%s")),
        "pagure.io" => Some(format!("{web_url}/blob/{refname}/f/%s")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch_ref(name: &str) -> Ref {
        Ref {
            kind: RefKind::Branch,
            shortname: name.to_string(),
            fullname: format!("refs/heads/{name}"),
            oid: "a".repeat(40),
            worktree_path: None,
            remote_name: None,
        }
    }

    fn tag_ref(name: &str) -> Ref {
        Ref {
            kind: RefKind::Tag,
            shortname: name.to_string(),
            fullname: format!("refs/tags/{name}"),
            oid: "b".repeat(40),
            worktree_path: None,
            remote_name: None,
        }
    }

    #[test]
    fn github_edit_patterns_differ_for_branches_and_tags() {
        let web = "https://github.com/org/repo";
        assert_eq!(
            host_edit_pattern(web, RefKind::Branch, "main").unwrap(),
            "https://github.com/org/repo/edit/main/%s"
        );
        assert_eq!(
            host_edit_pattern(web, RefKind::Tag, "v1.0").unwrap(),
            "https://github.com/org/repo/blob/v1.0/%s"
        );
    }

    #[test]
    fn gitlab_bitbucket_pagure_patterns() {
        assert_eq!(
            host_edit_pattern("https://gitlab.com/g/p", RefKind::Branch, "main").unwrap(),
            "https://gitlab.com/g/p/-/edit/main/%s"
        );
        assert_eq!(
            host_edit_pattern("https://bitbucket.org/t/r", RefKind::Branch, "main").unwrap(),
            "https://bitbucket.org/t/r/src/main/%s"
        );
        assert_eq!(
            host_edit_pattern("https://pagure.io/p", RefKind::Branch, "main").unwrap(),
            "https://pagure.io/p/blob/main/f/%s"
        );
        assert!(host_edit_pattern("https://git.example.org/r", RefKind::Branch, "main").is_none());
    }

    #[test]
    fn custom_template_substitutes_tokens() {
        let r = branch_ref("main");
        let pattern = edit_url_pattern(
            &EditUrlSpec::Template(
                "{web_url}/custom/{refname}/{branch}{tag}/{path}".to_string(),
            ),
            Some("https://git.example.org/r"),
            &r,
        )
        .unwrap();
        assert_eq!(pattern, "https://git.example.org/r/custom/main/main/%s");

        let t = tag_ref("v1.0");
        let pattern = edit_url_pattern(
            &EditUrlSpec::Template("{web_url}/t/{tag}/{path}".to_string()),
            Some("https://git.example.org/r"),
            &t,
        )
        .unwrap();
        assert_eq!(pattern, "https://git.example.org/r/t/v1.0/%s");
    }

    #[test]
    fn disabled_edit_url_yields_none() {
        let r = branch_ref("main");
        assert!(edit_url_pattern(&EditUrlSpec::Disabled, Some("https://github.com/o/r"), &r).is_none());
    }
}
