//! Árbol inmutable de configuración y consultas estructurales.
//!
//! El árbol se indexa por uuid mediante el *camino* de índices desde la raíz,
//! de modo que cualquier consulta devuelve referencias al `BlockConfig`
//! original (con sus hijos) sin copiar nada.
use std::collections::{BTreeSet, HashMap};

use super::{BlockConfig, EventBinding, Role, ANY_ROLE};
use crate::errors::CoreEngineError;

#[derive(Debug, Clone)]
pub struct PolicyTree {
    root: BlockConfig,
    /// uuid -> camino (primera aparición en orden DFS).
    paths: HashMap<String, Vec<usize>>,
    /// Todos los nodos en orden DFS pre-orden (incluye uuids vacíos/duplicados).
    order: Vec<Vec<usize>>,
    duplicates: Vec<String>,
}

/// Referencia a un nodo concreto del árbol (por camino, no por uuid).
#[derive(Debug, Clone)]
pub struct NodeRef<'a> {
    tree: &'a PolicyTree,
    path: Vec<usize>,
}

impl<'a> NodeRef<'a> {
    pub fn config(&self) -> &'a BlockConfig {
        self.tree.node(&self.path)
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }

    pub fn parent(&self) -> Option<NodeRef<'a>> {
        if self.path.is_empty() {
            return None;
        }
        Some(NodeRef { tree: self.tree,
                       path: self.path[..self.path.len() - 1].to_vec() })
    }

    /// Ancestros del más cercano al más lejano (la raíz al final).
    pub fn ancestors(&self) -> Vec<&'a BlockConfig> {
        (0..self.path.len()).rev().map(|i| self.tree.node(&self.path[..i])).collect()
    }

    /// Hermanos (excluye al propio nodo).
    pub fn siblings(&self) -> Vec<&'a BlockConfig> {
        match self.path.split_last() {
            None => Vec::new(),
            Some((own, parent)) => self.tree
                                       .node(parent)
                                       .children
                                       .iter()
                                       .enumerate()
                                       .filter(|(i, _)| i != own)
                                       .map(|(_, c)| c)
                                       .collect(),
        }
    }
}

impl PolicyTree {
    pub fn new(root: BlockConfig) -> Self {
        let mut tree = Self { root,
                              paths: HashMap::new(),
                              order: Vec::new(),
                              duplicates: Vec::new() };
        let mut stack: Vec<Vec<usize>> = vec![Vec::new()];
        while let Some(path) = stack.pop() {
            let node = tree.node(&path);
            // hijos en orden inverso para conservar pre-orden al hacer pop
            for i in (0..node.children.len()).rev() {
                let mut child = path.clone();
                child.push(i);
                stack.push(child);
            }
            if !node.uuid.is_empty() {
                if tree.paths.contains_key(&node.uuid) {
                    tree.duplicates.push(node.uuid.clone());
                } else {
                    tree.paths.insert(node.uuid.clone(), path.clone());
                }
            }
            tree.order.push(path);
        }
        tree
    }

    pub fn root(&self) -> &BlockConfig {
        &self.root
    }

    fn node(&self, path: &[usize]) -> &BlockConfig {
        path.iter().fold(&self.root, |n, i| &n.children[*i])
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, uuid: &str) -> bool {
        self.paths.contains_key(uuid)
    }

    pub fn find_by_uuid(&self, uuid: &str) -> Result<&BlockConfig, CoreEngineError> {
        self.paths
            .get(uuid)
            .map(|p| self.node(p))
            .ok_or_else(|| CoreEngineError::BlockNotFound(uuid.to_string()))
    }

    pub fn node_ref(&self, uuid: &str) -> Result<NodeRef<'_>, CoreEngineError> {
        self.paths
            .get(uuid)
            .map(|p| NodeRef { tree: self, path: p.clone() })
            .ok_or_else(|| CoreEngineError::BlockNotFound(uuid.to_string()))
    }

    pub fn children(&self, uuid: &str) -> Result<&[BlockConfig], CoreEngineError> {
        Ok(&self.find_by_uuid(uuid)?.children)
    }

    pub fn parent_of(&self, uuid: &str) -> Option<&BlockConfig> {
        self.node_ref(uuid).ok()?.parent().map(|p| p.config())
    }

    pub fn ancestors(&self, uuid: &str) -> Vec<&BlockConfig> {
        self.node_ref(uuid).map(|n| n.ancestors()).unwrap_or_default()
    }

    /// Permisos efectivos: los propios si no están vacíos; si no, los del
    /// ancestro más cercano que declare alguno; `ANY_ROLE` si nadie lo hace.
    pub fn permissions_for(&self, uuid: &str) -> Result<BTreeSet<Role>, CoreEngineError> {
        let node = self.node_ref(uuid)?;
        let own = node.config();
        if !own.permissions.is_empty() {
            return Ok(own.permissions.clone());
        }
        let inherited = node.ancestors().into_iter().find(|a| !a.permissions.is_empty());
        Ok(match inherited {
               Some(a) => a.permissions.clone(),
               None => BTreeSet::from([Role::new(ANY_ROLE)]),
           })
    }

    pub fn find_by_tag(&self, tag: &str) -> Option<&BlockConfig> {
        self.iter().find(|b| b.tag.as_deref() == Some(tag))
    }

    /// Bloques en orden DFS pre-orden.
    pub fn iter(&self) -> impl Iterator<Item = &BlockConfig> + '_ {
        self.order.iter().map(|p| self.node(p))
    }

    /// Nodos en orden DFS (incluye uuids vacíos o repetidos).
    pub fn nodes(&self) -> impl Iterator<Item = NodeRef<'_>> + '_ {
        self.order.iter().map(|p| NodeRef { tree: self, path: p.clone() })
    }

    pub fn duplicate_uuids(&self) -> &[String] {
        &self.duplicates
    }

    /// Todos los enlaces `(uuid origen, binding)` en orden DFS / declaración.
    pub fn bindings(&self) -> Vec<(&str, &EventBinding)> {
        self.iter()
            .flat_map(|b| b.output_events.iter().map(move |e| (b.uuid.as_str(), e)))
            .collect()
    }

    /// El grafo padre/hijo resuelto por uuid es acíclico si ningún bloque
    /// reutiliza el uuid de uno de sus ancestros.
    pub fn is_acyclic(&self) -> bool {
        self.nodes().all(|n| {
                        let uuid = &n.config().uuid;
                        uuid.is_empty() || n.ancestors().iter().all(|a| &a.uuid != uuid)
                    })
    }

    /// Busca un ciclo en el grafo de eventos (alcanzabilidad extendida sobre
    /// los `EventBinding`). Devuelve el camino testigo `[a, b, ..., a]`.
    pub fn event_cycle(&self) -> Option<Vec<String>> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnStack,
            Done,
        }
        let mut marks: HashMap<&str, Mark> = HashMap::new();
        for start in self.iter().map(|b| b.uuid.as_str()).filter(|u| !u.is_empty()) {
            if marks.get(start).copied().unwrap_or(Mark::New) != Mark::New {
                continue;
            }
            // DFS iterativo: (uuid, índice del próximo enlace a explorar)
            let mut stack: Vec<(&str, usize)> = vec![(start, 0)];
            marks.insert(start, Mark::OnStack);
            while let Some((current, next)) = stack.last().copied() {
                let edges: Vec<&str> = match self.find_by_uuid(current) {
                    Ok(b) => b.output_events
                               .iter()
                               .map(|e| e.target_block_uuid.as_str())
                               .filter(|t| self.contains(t))
                               .collect(),
                    Err(_) => Vec::new(),
                };
                if next >= edges.len() {
                    marks.insert(current, Mark::Done);
                    stack.pop();
                    continue;
                }
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                let target = edges[next];
                match marks.get(target).copied().unwrap_or(Mark::New) {
                    Mark::OnStack => {
                        let from = stack.iter().position(|(u, _)| *u == target).unwrap_or(0);
                        let mut cycle: Vec<String> = stack[from..].iter().map(|(u, _)| u.to_string()).collect();
                        cycle.push(target.to_string());
                        return Some(cycle);
                    }
                    Mark::New => {
                        marks.insert(target, Mark::OnStack);
                        stack.push((target, 0));
                    }
                    Mark::Done => {}
                }
            }
        }
        None
    }
}
