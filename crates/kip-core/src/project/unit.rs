//! Unit registry: the root project and its services.
//!
//! Units live in a flat `Vec` indexed by [`UnitId`]. A leaf refers to its
//! parent by id, never by ownership; cascade lookups go through the tree.

use std::path::Path;

use crate::config::{ScriptConfig, UnitConfig, UnitKind};
use crate::error::{KipError, KipResult};

use super::paths::UnitPaths;

/// Index of a unit inside its [`UnitTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UnitId(usize);

/// One node of the project tree.
#[derive(Debug, Clone)]
pub struct Unit {
    id: UnitId,
    name: String,
    paths: UnitPaths,
    config: UnitConfig,
    parent: Option<UnitId>,
    children: Vec<UnitId>,
}

impl Unit {
    pub fn id(&self) -> UnitId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dir(&self) -> &Path {
        &self.paths.root
    }

    pub fn paths(&self) -> &UnitPaths {
        &self.paths
    }

    /// Fixed at load time.
    pub fn kind(&self) -> UnitKind {
        self.config.kind
    }

    pub fn config(&self) -> &UnitConfig {
        &self.config
    }

    pub fn parent(&self) -> Option<UnitId> {
        self.parent
    }

    /// Build and push require a Dockerfile in the unit directory.
    pub fn has_dockerfile(&self) -> bool {
        self.paths.dockerfile().is_file()
    }

    pub fn scripts(&self) -> &[ScriptConfig] {
        &self.config.scripts
    }

    pub fn script(&self, name: &str) -> KipResult<&ScriptConfig> {
        self.config
            .scripts
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| KipError::ScriptNotFound(name.to_string()))
    }
}

/// Registry of every unit in a project.
#[derive(Debug, Clone)]
pub struct UnitTree {
    units: Vec<Unit>,
}

impl UnitTree {
    /// Start a tree from its top unit (a root project or a standalone service).
    pub fn new(dir: &Path, config: UnitConfig) -> Self {
        let name = dir_name(dir);
        Self {
            units: vec![Unit {
                id: UnitId(0),
                name,
                paths: UnitPaths::new(dir),
                config,
                parent: None,
                children: Vec::new(),
            }],
        }
    }

    /// Attach a service under the top unit.
    pub fn add_service(&mut self, dir: &Path, config: UnitConfig) -> KipResult<UnitId> {
        let root = self.root_id();
        let invalid = |message: String| KipError::InvalidConfig {
            path: dir.to_path_buf(),
            message,
        };

        if self.units[root.0].kind() != UnitKind::Root {
            return Err(invalid(format!(
                "cannot attach a service to {} unit \"{}\"",
                self.units[root.0].kind(),
                self.units[root.0].name
            )));
        }
        if config.kind != UnitKind::Leaf {
            return Err(invalid(format!(
                "service declares kind \"{}\", expected \"leaf\"",
                config.kind
            )));
        }

        let name = dir_name(dir);
        if self.find_service(&name).is_some() {
            return Err(invalid(format!("duplicate service \"{name}\"")));
        }

        let id = UnitId(self.units.len());
        self.units.push(Unit {
            id,
            name,
            paths: UnitPaths::new(dir),
            config,
            parent: Some(root),
            children: Vec::new(),
        });
        self.units[root.0].children.push(id);
        Ok(id)
    }

    pub fn root_id(&self) -> UnitId {
        UnitId(0)
    }

    pub fn root(&self) -> &Unit {
        &self.units[0]
    }

    /// Panics on an id from another tree; ids are only minted here.
    pub fn get(&self, id: UnitId) -> &Unit {
        &self.units[id.0]
    }

    pub fn parent_of(&self, id: UnitId) -> Option<&Unit> {
        self.get(id).parent.map(|p| self.get(p))
    }

    /// Buildable services: the root's children, or the top unit itself when
    /// it is a standalone service.
    pub fn services(&self) -> Vec<&Unit> {
        let root = self.root();
        match root.kind() {
            UnitKind::Root => root.children.iter().map(|&id| self.get(id)).collect(),
            UnitKind::Leaf => vec![root],
        }
    }

    pub fn find_service(&self, name: &str) -> Option<&Unit> {
        self.services().into_iter().find(|u| u.name == name)
    }

    pub fn service(&self, name: &str) -> KipResult<&Unit> {
        self.find_service(name)
            .ok_or_else(|| KipError::ServiceNotFound(name.to_string()))
    }
}

fn dir_name(dir: &Path) -> String {
    dir.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| dir.display().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_tree() -> UnitTree {
        UnitTree::new(Path::new("/work/shop"), UnitConfig::new(UnitKind::Root))
    }

    #[test]
    fn test_services_of_root() {
        let mut tree = root_tree();
        let api = tree
            .add_service(
                Path::new("/work/shop/services/api"),
                UnitConfig::new(UnitKind::Leaf),
            )
            .unwrap();

        assert_eq!(tree.root().name(), "shop");
        assert_eq!(tree.get(api).name(), "api");
        assert_eq!(tree.get(api).parent(), Some(tree.root_id()));
        assert_eq!(tree.parent_of(api).map(Unit::name), Some("shop"));
        assert_eq!(tree.services().len(), 1);
        assert!(tree.service("api").is_ok());
        assert!(matches!(
            tree.service("web"),
            Err(KipError::ServiceNotFound(name)) if name == "web"
        ));
    }

    #[test]
    fn test_standalone_leaf_is_its_own_service() {
        let tree = UnitTree::new(Path::new("/work/api"), UnitConfig::new(UnitKind::Leaf));
        let services = tree.services();
        assert_eq!(services.len(), 1);
        assert_eq!(services[0].name(), "api");
        assert!(services[0].parent().is_none());
    }

    #[test]
    fn test_rejects_root_kind_service() {
        let mut tree = root_tree();
        let err = tree
            .add_service(
                Path::new("/work/shop/services/api"),
                UnitConfig::new(UnitKind::Root),
            )
            .unwrap_err();
        assert!(matches!(err, KipError::InvalidConfig { .. }));
    }

    #[test]
    fn test_rejects_service_under_leaf() {
        let mut tree = UnitTree::new(Path::new("/work/api"), UnitConfig::new(UnitKind::Leaf));
        assert!(
            tree.add_service(Path::new("/work/api/x"), UnitConfig::new(UnitKind::Leaf))
                .is_err()
        );
    }

    #[test]
    fn test_script_lookup() {
        let mut config = UnitConfig::new(UnitKind::Root);
        config.scripts.push(ScriptConfig {
            name: "seed".to_string(),
            command: "./seed.sh".to_string(),
            bindings: vec![],
            environments: vec![],
            args: vec![],
        });
        let tree = UnitTree::new(Path::new("/work/shop"), config);
        assert!(tree.root().script("seed").is_ok());
        assert!(matches!(
            tree.root().script("nope"),
            Err(KipError::ScriptNotFound(_))
        ));
    }
}
