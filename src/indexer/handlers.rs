//! Per-template event handlers.
//!
//! Handlers stage their effects in the change set and return. Parameters are
//! parsed before anything is resolved, so a malformed event leaves no trace
//! beyond its dedup mark.

use super::relationships::{ChildRef, Link, RelationshipBuilder};
use super::{ChangeSet, EntityResolver, IndexError};
use crate::domain::{
    counter, Address, ArithmeticError, Entity, EntityId, EntityKind, EventEnvelope, ParamError,
    TemplateKind, U256,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub(super) enum HandlerError {
    #[error(transparent)]
    Param(#[from] ParamError),
    #[error(transparent)]
    Index(#[from] IndexError),
}

impl From<ArithmeticError> for HandlerError {
    fn from(err: ArithmeticError) -> Self {
        HandlerError::Index(err.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Handled {
    Applied,
    Unmapped,
}

pub(super) struct Handlers {
    resolver: Arc<EntityResolver>,
    builder: RelationshipBuilder,
}

impl Handlers {
    pub(super) fn new(resolver: Arc<EntityResolver>) -> Self {
        Handlers {
            builder: RelationshipBuilder::new(resolver.clone()),
            resolver,
        }
    }

    pub(super) async fn dispatch(
        &self,
        cs: &mut ChangeSet,
        template: TemplateKind,
        event: &EventEnvelope,
    ) -> Result<Handled, HandlerError> {
        use TemplateKind as T;
        match (template, event.event_name.as_str()) {
            (T::DeploymentRegistry, "SystemDeployed") => self.system_deployed(cs, event).await?,
            (T::DeploymentRegistry, "TokenRegistryDeployed") => {
                let registry = event.address_param("registry")?;
                let type_name = event.string_param_or_default("typeName");
                self.link_one(cs, event, ChildRef::labelled(Link::TokenRegistry, registry, type_name))
                    .await?
            }
            (T::DeploymentRegistry, "ComplianceModuleRegistered") => {
                let module = event.address_param("module")?;
                let name = event.string_param_or_default("name");
                self.link_one(cs, event, ChildRef::labelled(Link::ComplianceModule, module, name))
                    .await?
            }
            (T::DeploymentRegistry, "SettlementFactoryDeployed") => {
                let factory = event.address_param("factory")?;
                self.link_one(cs, event, ChildRef::new(Link::SettlementFactory, factory))
                    .await?
            }
            (T::TokenRegistry, "TokenDeployed") => self.token_deployed(cs, event).await?,
            (T::Token, "Transfer") => self.transfer(cs, event).await?,
            (T::Token, "CollateralUpdated") => self.collateral_updated(cs, event).await?,
            (T::SettlementFactory, "XvPSettlementCreated") => {
                let settlement = event.address_param("settlement")?;
                let entry = self
                    .builder
                    .settlement_created(cs, event.contract_address, settlement)
                    .await?;
                if entry.created {
                    cs.bump(
                        &EntityId::from_address(event.contract_address),
                        counter::SETTLEMENTS_CREATED,
                        U256::from(1u8),
                    );
                }
            }
            (T::Settlement, "XvPSettlementApproved") => self.approval(cs, event, true).await?,
            (T::Settlement, "XvPSettlementApprovalRevoked") => {
                self.approval(cs, event, false).await?
            }
            (T::Settlement, "XvPSettlementExecuted") => {
                self.settlement_flag(cs, event, |s| s.executed = true).await?
            }
            (T::Settlement, "XvPSettlementCancelled") => {
                self.settlement_flag(cs, event, |s| s.cancelled = true).await?
            }
            (T::IdentityRegistry, "IdentityRegistered") => {
                self.identity_registered(cs, event).await?
            }
            _ => return Ok(Handled::Unmapped),
        }
        Ok(Handled::Applied)
    }

    async fn link_one(
        &self,
        cs: &mut ChangeSet,
        event: &EventEnvelope,
        child: ChildRef,
    ) -> Result<(), HandlerError> {
        let parent = EntityId::from_address(event.contract_address);
        self.builder.link(cs, &parent, &[child]).await?;
        Ok(())
    }

    async fn system_deployed(
        &self,
        cs: &mut ChangeSet,
        event: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        let compliance = event.address_param("compliance")?;
        let identity = event.address_param("identityRegistry")?;
        let storage = event.address_param("identityRegistryStorage")?;
        let trusted = event.address_param("trustedIssuersRegistry")?;

        let parent = EntityId::from_address(event.contract_address);
        self.builder
            .link(
                cs,
                &parent,
                &[
                    ChildRef::labelled(Link::Compliance, compliance, "compliance"),
                    ChildRef::new(Link::IdentityRegistry, identity),
                    ChildRef::new(Link::IdentityRegistryStorage, storage),
                    ChildRef::new(Link::TrustedIssuersRegistry, trusted),
                ],
            )
            .await?;
        self.builder
            .link_identity(cs, identity, storage, trusted)
            .await?;
        Ok(())
    }

    async fn token_deployed(
        &self,
        cs: &mut ChangeSet,
        event: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        let token = event.address_param("token")?;
        let token_type = event.string_param_or_default("tokenType");
        let registry = EntityId::from_address(event.contract_address);

        let linked = self
            .builder
            .link(cs, &registry, &[ChildRef::labelled(Link::Token, token, token_type)])
            .await?;
        if linked.iter().any(|r| r.created) {
            cs.bump(&registry, counter::TOKENS_DEPLOYED, U256::from(1u8));
        }
        Ok(())
    }

    async fn transfer(&self, cs: &mut ChangeSet, event: &EventEnvelope) -> Result<(), HandlerError> {
        let from = event.address_param("from")?;
        let to = event.address_param("to")?;
        let value = event.u256_param("value")?;

        let token = event.contract_address;
        let token_id = EntityId::from_address(token);
        self.resolver
            .resolve(cs, &token_id, EntityKind::Token)
            .await?;

        let mint = from.is_zero();
        let burn = to.is_zero();
        if !mint {
            self.move_balance(cs, token, from, value, Direction::Debit)
                .await?;
        }
        if !burn {
            self.move_balance(cs, token, to, value, Direction::Credit)
                .await?;
        }
        if let Some(Entity::Token(t)) = cs.get_mut(&token_id) {
            if mint {
                t.total_supply = t.total_supply.checked_add(value)?;
            }
            if burn {
                t.total_supply = t.total_supply.checked_sub(value)?;
            }
        }

        cs.bump(&token_id, counter::TRANSFERS_COUNT, U256::from(1u8));
        if mint {
            cs.bump(&token_id, counter::TOTAL_MINTED, value);
        }
        if burn {
            cs.bump(&token_id, counter::TOTAL_BURNED, value);
        }
        if !mint && !burn {
            cs.bump(&token_id, counter::TOTAL_TRANSFERRED, value);
        }
        debug!(token = %token, %from, %to, %value, "transfer");
        Ok(())
    }

    /// Apply one side of a transfer and keep `holders_count` in step with
    /// balances crossing zero.
    async fn move_balance(
        &self,
        cs: &mut ChangeSet,
        token: Address,
        account: Address,
        value: U256,
        direction: Direction,
    ) -> Result<(), HandlerError> {
        self.resolver.resolve_account(cs, account).await?;
        let balance_id = self.resolver.resolve_balance(cs, token, account).await?.id;
        let at = cs.timestamp();

        let (was_holder, is_holder) = match cs.get_mut(&balance_id) {
            Some(Entity::TokenBalance(balance)) => {
                let was_holder = !balance.value.is_zero();
                balance.value = match direction {
                    Direction::Debit => balance.value.checked_sub(value)?,
                    Direction::Credit => balance.value.checked_add(value)?,
                };
                balance.updated_at = at;
                (was_holder, !balance.value.is_zero())
            }
            _ => return Ok(()),
        };

        if was_holder != is_holder {
            if let Some(Entity::Token(t)) = cs.get_mut(&EntityId::from_address(token)) {
                t.holders_count = if is_holder {
                    t.holders_count
                        .checked_add(1)
                        .ok_or(ArithmeticError::Overflow("holders count"))?
                } else {
                    t.holders_count
                        .checked_sub(1)
                        .ok_or(ArithmeticError::Underflow("holders count"))?
                };
            }
        }
        Ok(())
    }

    async fn collateral_updated(
        &self,
        cs: &mut ChangeSet,
        event: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        let amount = event.u256_param("amount")?;
        let token_id = EntityId::from_address(event.contract_address);
        self.resolver
            .resolve(cs, &token_id, EntityKind::Token)
            .await?;
        if let Some(Entity::Token(t)) = cs.get_mut(&token_id) {
            t.collateral = amount;
        }
        cs.bump(&token_id, counter::COLLATERAL_UPDATES, U256::from(1u8));
        Ok(())
    }

    async fn approval(
        &self,
        cs: &mut ChangeSet,
        event: &EventEnvelope,
        approved: bool,
    ) -> Result<(), HandlerError> {
        let sender = event.address_param("sender")?;
        self.resolver.resolve_account(cs, sender).await?;
        let id = self
            .resolver
            .resolve_approval(cs, event.contract_address, sender)
            .await?
            .id;
        let at = cs.timestamp();
        if let Some(Entity::Approval(a)) = cs.get_mut(&id) {
            a.approved = approved;
            a.timestamp = approved.then_some(at);
        }
        Ok(())
    }

    async fn settlement_flag(
        &self,
        cs: &mut ChangeSet,
        event: &EventEnvelope,
        set: impl FnOnce(&mut crate::domain::Settlement),
    ) -> Result<(), HandlerError> {
        let id = self
            .resolver
            .resolve_settlement(cs, event.contract_address)
            .await?
            .id;
        if let Some(Entity::Settlement(s)) = cs.get_mut(&id) {
            set(s);
        }
        Ok(())
    }

    async fn identity_registered(
        &self,
        cs: &mut ChangeSet,
        event: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        let wallet = event.address_param("wallet")?;
        let identity = event.address_param("identity")?;
        self.resolver.resolve_account(cs, wallet).await?;
        cs.bump(
            &EntityId::from_address(event.contract_address),
            counter::IDENTITIES_REGISTERED,
            U256::from(1u8),
        );
        debug!(%wallet, %identity, "identity registered");
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Debit,
    Credit,
}
