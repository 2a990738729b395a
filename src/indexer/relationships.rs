//! Cross-entity references and dynamic contract discovery.

use super::{ChangeSet, EntityResolver, IndexError, Resolved};
use crate::chain::{Accessor, ReadValue};
use crate::domain::{
    Address, ArithmeticError, Entity, EntityId, EntityKind, Flow, TemplateKind, TokenAmount,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// How a child hangs off its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Link {
    /// DeploymentRegistry singletons.
    Compliance,
    IdentityRegistry,
    IdentityRegistryStorage,
    TrustedIssuersRegistry,
    /// DeploymentRegistry collections.
    TokenRegistry,
    ComplianceModule,
    SettlementFactory,
    /// TokenRegistry → Token.
    Token,
    /// SettlementFactory → Settlement.
    Settlement,
}

impl Link {
    pub fn parent_kind(&self) -> EntityKind {
        match self {
            Link::Token => EntityKind::TokenRegistry,
            Link::Settlement => EntityKind::SettlementFactory,
            _ => EntityKind::DeploymentRegistry,
        }
    }

    pub fn template(&self) -> TemplateKind {
        match self {
            Link::Compliance | Link::ComplianceModule => TemplateKind::ComplianceModule,
            Link::IdentityRegistry => TemplateKind::IdentityRegistry,
            Link::IdentityRegistryStorage => TemplateKind::IdentityRegistryStorage,
            Link::TrustedIssuersRegistry => TemplateKind::TrustedIssuersRegistry,
            Link::TokenRegistry => TemplateKind::TokenRegistry,
            Link::SettlementFactory => TemplateKind::SettlementFactory,
            Link::Token => TemplateKind::Token,
            Link::Settlement => TemplateKind::Settlement,
        }
    }

    pub fn child_kind(&self) -> EntityKind {
        self.template().entity_kind()
    }
}

/// A child contract referenced by a deployment or registration event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildRef {
    pub link: Link,
    pub address: Address,
    /// Name or type label applied when the child is created.
    pub label: String,
}

impl ChildRef {
    pub fn new(link: Link, address: Address) -> Self {
        ChildRef {
            link,
            address,
            label: String::new(),
        }
    }

    pub fn labelled(link: Link, address: Address, label: impl Into<String>) -> Self {
        ChildRef {
            link,
            address,
            label: label.into(),
        }
    }
}

pub struct RelationshipBuilder {
    resolver: Arc<EntityResolver>,
}

impl RelationshipBuilder {
    pub fn new(resolver: Arc<EntityResolver>) -> Self {
        RelationshipBuilder { resolver }
    }

    /// Resolve every child, point the parent's foreign keys at them (and the
    /// children back at the parent), and watch each child contract.
    pub async fn link(
        &self,
        cs: &mut ChangeSet,
        parent: &EntityId,
        children: &[ChildRef],
    ) -> Result<Vec<Resolved>, IndexError> {
        let mut resolved = Vec::with_capacity(children.len());
        for child in children {
            self.resolver
                .resolve(cs, parent, child.link.parent_kind())
                .await?;
            let entry = match child.link {
                Link::Token => {
                    self.resolver
                        .resolve_token(cs, child.address, &child.label)
                        .await?
                }
                link => {
                    self.resolver
                        .resolve(cs, &EntityId::from_address(child.address), link.child_kind())
                        .await?
                }
            };
            if entry.created {
                apply_label(cs, &entry.id, &child.label);
            }
            set_parent(cs, parent, &entry.id, child.link);
            cs.subscribe(child.address, child.link.template());
            debug!(parent = %parent, child = %entry.id, link = ?child.link, "linked");
            resolved.push(entry);
        }
        Ok(resolved)
    }

    /// Record the storage and trusted-issuers registries an identity registry uses.
    pub async fn link_identity(
        &self,
        cs: &mut ChangeSet,
        identity: Address,
        storage: Address,
        trusted_issuers: Address,
    ) -> Result<(), IndexError> {
        let id = EntityId::from_address(identity);
        self.resolver
            .resolve(cs, &id, EntityKind::IdentityRegistry)
            .await?;
        if let Some(Entity::IdentityRegistry(registry)) = cs.get_mut(&id) {
            registry.storage.get_or_insert_with(|| EntityId::from_address(storage));
            registry
                .trusted_issuers
                .get_or_insert_with(|| EntityId::from_address(trusted_issuers));
        }
        Ok(())
    }

    /// Link a new settlement to its factory and, the first time it is seen,
    /// materialize its flows and participant set.
    pub async fn settlement_created(
        &self,
        cs: &mut ChangeSet,
        factory: Address,
        settlement: Address,
    ) -> Result<Resolved, IndexError> {
        let factory_id = EntityId::from_address(factory);
        let linked = self
            .link(cs, &factory_id, &[ChildRef::new(Link::Settlement, settlement)])
            .await?;
        let Some(entry) = linked.into_iter().next() else {
            return Err(IndexError::Unresolvable {
                id: EntityId::from_address(settlement),
                kind: EntityKind::Settlement,
            });
        };
        if !entry.created {
            return Ok(entry);
        }

        let legs = match self.resolver.read(settlement, Accessor::Flows).await? {
            Some(ReadValue::Flows(legs)) => legs,
            _ => Vec::new(),
        };

        let mut flows = Vec::with_capacity(legs.len());
        let mut participants = BTreeSet::new();
        for (index, leg) in legs.iter().enumerate() {
            let index = u32::try_from(index).map_err(|_| ArithmeticError::Overflow("flow index"))?;
            let flow_id = EntityId::with_index(settlement, index);
            let from = self.resolver.resolve_account(cs, leg.from).await?.id;
            let to = self.resolver.resolve_account(cs, leg.to).await?.id;
            participants.insert(from.clone());
            participants.insert(to.clone());

            if !self.resolver.load(cs, &flow_id).await? {
                let decimals = self.resolver.token_decimals(cs, leg.asset).await?;
                cs.insert_new(Entity::Flow(Flow {
                    id: flow_id.clone(),
                    settlement: entry.id.clone(),
                    index,
                    asset: EntityId::from_address(leg.asset),
                    from,
                    to,
                    amount: TokenAmount::new(leg.amount, decimals)?,
                }));
            }
            flows.push(flow_id);
        }

        if let Some(Entity::Settlement(s)) = cs.get_mut(&entry.id) {
            s.flows = flows;
            s.participants = participants.into_iter().collect();
        }
        Ok(entry)
    }
}

fn apply_label(cs: &mut ChangeSet, id: &EntityId, label: &str) {
    if label.is_empty() {
        return;
    }
    match cs.get_mut(id) {
        Some(Entity::TokenRegistry(r)) => r.type_name = label.to_string(),
        Some(Entity::ComplianceModule(m)) => m.name = label.to_string(),
        _ => {}
    }
}

fn set_parent(cs: &mut ChangeSet, parent: &EntityId, child: &EntityId, link: Link) {
    if let Some(Entity::DeploymentRegistry(registry)) = cs.get_mut(parent) {
        match link {
            Link::Compliance => registry.compliance = Some(child.clone()),
            Link::IdentityRegistry => registry.identity_registry = Some(child.clone()),
            Link::IdentityRegistryStorage => {
                registry.identity_registry_storage = Some(child.clone())
            }
            Link::TrustedIssuersRegistry => {
                registry.trusted_issuers_registry = Some(child.clone())
            }
            Link::TokenRegistry => {
                registry.token_registries.insert(child.clone());
            }
            Link::ComplianceModule => {
                registry.compliance_modules.insert(child.clone());
            }
            Link::SettlementFactory => {
                registry.settlement_factories.insert(child.clone());
            }
            Link::Token | Link::Settlement => {}
        }
    }

    let back_ref = match cs.get_mut(child) {
        Some(Entity::TokenRegistry(r)) => &mut r.deployment_registry,
        Some(Entity::ComplianceModule(m)) => &mut m.deployment_registry,
        Some(Entity::SettlementFactory(f)) => &mut f.deployment_registry,
        Some(Entity::Token(t)) => &mut t.registry,
        Some(Entity::Settlement(s)) => &mut s.factory,
        _ => return,
    };
    back_ref.get_or_insert_with(|| parent.clone());
}
