//! Graph nodes materialized from chain events.

use crate::domain::amount::u256_dec;
use crate::domain::{BlockTime, EntityId, TokenAmount};
use alloy_primitives::{Address, U256};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Persisted entity type, used by the "by type" index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Account,
    Token,
    TokenBalance,
    Settlement,
    Flow,
    Approval,
    DeploymentRegistry,
    TokenRegistry,
    ComplianceModule,
    IdentityRegistry,
    IdentityRegistryStorage,
    TrustedIssuersRegistry,
    SettlementFactory,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Account => "account",
            EntityKind::Token => "token",
            EntityKind::TokenBalance => "tokenBalance",
            EntityKind::Settlement => "settlement",
            EntityKind::Flow => "flow",
            EntityKind::Approval => "approval",
            EntityKind::DeploymentRegistry => "deploymentRegistry",
            EntityKind::TokenRegistry => "tokenRegistry",
            EntityKind::ComplianceModule => "complianceModule",
            EntityKind::IdentityRegistry => "identityRegistry",
            EntityKind::IdentityRegistryStorage => "identityRegistryStorage",
            EntityKind::TrustedIssuersRegistry => "trustedIssuersRegistry",
            EntityKind::SettlementFactory => "settlementFactory",
        }
    }
}

impl FromStr for EntityKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim() {
            "account" => EntityKind::Account,
            "token" => EntityKind::Token,
            "tokenBalance" => EntityKind::TokenBalance,
            "settlement" => EntityKind::Settlement,
            "flow" => EntityKind::Flow,
            "approval" => EntityKind::Approval,
            "deploymentRegistry" => EntityKind::DeploymentRegistry,
            "tokenRegistry" => EntityKind::TokenRegistry,
            "complianceModule" => EntityKind::ComplianceModule,
            "identityRegistry" => EntityKind::IdentityRegistry,
            "identityRegistryStorage" => EntityKind::IdentityRegistryStorage,
            "trustedIssuersRegistry" => EntityKind::TrustedIssuersRegistry,
            "settlementFactory" => EntityKind::SettlementFactory,
            other => return Err(format!("unknown entity kind: {}", other)),
        };
        Ok(kind)
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Handler family for a watched contract address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TemplateKind {
    DeploymentRegistry,
    TokenRegistry,
    Token,
    ComplianceModule,
    IdentityRegistry,
    IdentityRegistryStorage,
    TrustedIssuersRegistry,
    SettlementFactory,
    Settlement,
}

impl TemplateKind {
    pub fn as_str(&self) -> &'static str {
        self.entity_kind().as_str()
    }

    /// The entity materialized for a contract watched under this template.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            TemplateKind::DeploymentRegistry => EntityKind::DeploymentRegistry,
            TemplateKind::TokenRegistry => EntityKind::TokenRegistry,
            TemplateKind::Token => EntityKind::Token,
            TemplateKind::ComplianceModule => EntityKind::ComplianceModule,
            TemplateKind::IdentityRegistry => EntityKind::IdentityRegistry,
            TemplateKind::IdentityRegistryStorage => EntityKind::IdentityRegistryStorage,
            TemplateKind::TrustedIssuersRegistry => EntityKind::TrustedIssuersRegistry,
            TemplateKind::SettlementFactory => EntityKind::SettlementFactory,
            TemplateKind::Settlement => EntityKind::Settlement,
        }
    }
}

impl FromStr for TemplateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let template = match EntityKind::from_str(s)? {
            EntityKind::DeploymentRegistry => TemplateKind::DeploymentRegistry,
            EntityKind::TokenRegistry => TemplateKind::TokenRegistry,
            EntityKind::Token => TemplateKind::Token,
            EntityKind::ComplianceModule => TemplateKind::ComplianceModule,
            EntityKind::IdentityRegistry => TemplateKind::IdentityRegistry,
            EntityKind::IdentityRegistryStorage => TemplateKind::IdentityRegistryStorage,
            EntityKind::TrustedIssuersRegistry => TemplateKind::TrustedIssuersRegistry,
            EntityKind::SettlementFactory => TemplateKind::SettlementFactory,
            EntityKind::Settlement => TemplateKind::Settlement,
            other => return Err(format!("{} is not a contract template", other)),
        };
        Ok(template)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: EntityId,
    pub first_seen: BlockTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub id: EntityId,
    pub name: String,
    pub symbol: String,
    pub decimals: u8,
    pub token_type: String,
    pub total_supply: TokenAmount,
    /// Zero for tokens without a bond face value.
    #[serde(with = "u256_dec")]
    pub face_value: U256,
    pub denomination_asset: Option<EntityId>,
    #[serde(with = "u256_dec")]
    pub collateral: U256,
    pub registry: Option<EntityId>,
    pub holders_count: u64,
    pub created_at: BlockTime,
}

impl Token {
    pub fn is_bond(&self) -> bool {
        !self.face_value.is_zero()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenBalance {
    pub id: EntityId,
    pub token: EntityId,
    pub account: EntityId,
    pub value: TokenAmount,
    pub updated_at: BlockTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settlement {
    pub id: EntityId,
    pub cutoff_date: BlockTime,
    pub auto_execute: bool,
    pub executed: bool,
    pub cancelled: bool,
    pub factory: Option<EntityId>,
    /// Flow ids in index order.
    pub flows: Vec<EntityId>,
    pub participants: Vec<EntityId>,
    pub created_at: BlockTime,
}

/// One leg of a settlement. Written once, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flow {
    pub id: EntityId,
    pub settlement: EntityId,
    pub index: u32,
    pub asset: EntityId,
    pub from: EntityId,
    pub to: EntityId,
    pub amount: TokenAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Approval {
    pub id: EntityId,
    pub settlement: EntityId,
    pub account: EntityId,
    pub approved: bool,
    pub timestamp: Option<BlockTime>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRegistry {
    pub id: EntityId,
    pub compliance: Option<EntityId>,
    pub identity_registry: Option<EntityId>,
    pub identity_registry_storage: Option<EntityId>,
    pub trusted_issuers_registry: Option<EntityId>,
    pub token_registries: BTreeSet<EntityId>,
    pub compliance_modules: BTreeSet<EntityId>,
    pub settlement_factories: BTreeSet<EntityId>,
    pub created_at: BlockTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRegistry {
    pub id: EntityId,
    pub type_name: String,
    pub deployment_registry: Option<EntityId>,
    pub created_at: BlockTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceModule {
    pub id: EntityId,
    pub name: String,
    pub deployment_registry: Option<EntityId>,
    pub created_at: BlockTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRegistry {
    pub id: EntityId,
    pub storage: Option<EntityId>,
    pub trusted_issuers: Option<EntityId>,
    pub created_at: BlockTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRegistryStorage {
    pub id: EntityId,
    pub created_at: BlockTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedIssuersRegistry {
    pub id: EntityId,
    pub created_at: BlockTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementFactory {
    pub id: EntityId,
    pub deployment_registry: Option<EntityId>,
    pub created_at: BlockTime,
}

/// Any node of the entity graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum Entity {
    Account(Account),
    Token(Token),
    TokenBalance(TokenBalance),
    Settlement(Settlement),
    Flow(Flow),
    Approval(Approval),
    DeploymentRegistry(DeploymentRegistry),
    TokenRegistry(TokenRegistry),
    ComplianceModule(ComplianceModule),
    IdentityRegistry(IdentityRegistry),
    IdentityRegistryStorage(IdentityRegistryStorage),
    TrustedIssuersRegistry(TrustedIssuersRegistry),
    SettlementFactory(SettlementFactory),
}

impl Entity {
    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Account(e) => &e.id,
            Entity::Token(e) => &e.id,
            Entity::TokenBalance(e) => &e.id,
            Entity::Settlement(e) => &e.id,
            Entity::Flow(e) => &e.id,
            Entity::Approval(e) => &e.id,
            Entity::DeploymentRegistry(e) => &e.id,
            Entity::TokenRegistry(e) => &e.id,
            Entity::ComplianceModule(e) => &e.id,
            Entity::IdentityRegistry(e) => &e.id,
            Entity::IdentityRegistryStorage(e) => &e.id,
            Entity::TrustedIssuersRegistry(e) => &e.id,
            Entity::SettlementFactory(e) => &e.id,
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Account(_) => EntityKind::Account,
            Entity::Token(_) => EntityKind::Token,
            Entity::TokenBalance(_) => EntityKind::TokenBalance,
            Entity::Settlement(_) => EntityKind::Settlement,
            Entity::Flow(_) => EntityKind::Flow,
            Entity::Approval(_) => EntityKind::Approval,
            Entity::DeploymentRegistry(_) => EntityKind::DeploymentRegistry,
            Entity::TokenRegistry(_) => EntityKind::TokenRegistry,
            Entity::ComplianceModule(_) => EntityKind::ComplianceModule,
            Entity::IdentityRegistry(_) => EntityKind::IdentityRegistry,
            Entity::IdentityRegistryStorage(_) => EntityKind::IdentityRegistryStorage,
            Entity::TrustedIssuersRegistry(_) => EntityKind::TrustedIssuersRegistry,
            Entity::SettlementFactory(_) => EntityKind::SettlementFactory,
        }
    }

    /// Owning entity for the "children of" index: a balance's token, a flow's
    /// settlement, a token's registry.
    pub fn parent(&self) -> Option<&EntityId> {
        match self {
            Entity::Token(e) => e.registry.as_ref(),
            Entity::TokenBalance(e) => Some(&e.token),
            Entity::Settlement(e) => e.factory.as_ref(),
            Entity::Flow(e) => Some(&e.settlement),
            Entity::Approval(e) => Some(&e.settlement),
            Entity::TokenRegistry(e) => e.deployment_registry.as_ref(),
            Entity::ComplianceModule(e) => e.deployment_registry.as_ref(),
            Entity::SettlementFactory(e) => e.deployment_registry.as_ref(),
            _ => None,
        }
    }
}

/// Empty-state constructor for address-keyed contract nodes whose fields are
/// all filled in later by links.
pub fn contract_node(kind: EntityKind, address: Address, at: BlockTime) -> Option<Entity> {
    let id = EntityId::from_address(address);
    let entity = match kind {
        EntityKind::Account => Entity::Account(Account { id, first_seen: at }),
        EntityKind::DeploymentRegistry => Entity::DeploymentRegistry(DeploymentRegistry {
            id,
            compliance: None,
            identity_registry: None,
            identity_registry_storage: None,
            trusted_issuers_registry: None,
            token_registries: BTreeSet::new(),
            compliance_modules: BTreeSet::new(),
            settlement_factories: BTreeSet::new(),
            created_at: at,
        }),
        EntityKind::IdentityRegistry => Entity::IdentityRegistry(IdentityRegistry {
            id,
            storage: None,
            trusted_issuers: None,
            created_at: at,
        }),
        EntityKind::IdentityRegistryStorage => {
            Entity::IdentityRegistryStorage(IdentityRegistryStorage { id, created_at: at })
        }
        EntityKind::TrustedIssuersRegistry => {
            Entity::TrustedIssuersRegistry(TrustedIssuersRegistry { id, created_at: at })
        }
        EntityKind::SettlementFactory => Entity::SettlementFactory(SettlementFactory {
            id,
            deployment_registry: None,
            created_at: at,
        }),
        _ => return None,
    };
    Some(entity)
}
