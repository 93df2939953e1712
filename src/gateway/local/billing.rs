use chrono::{DateTime, Datelike, Months, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::directory::insert_invite;
use super::{
    col_enum, col_opt_ts, col_opt_uuid, col_ts, col_uuid, collect, insert_member, ts, LocalGateway,
    DEFAULT_INVITE_TTL_DAYS,
};
use crate::gateway::{BillingGateway, GatewayError};
use crate::money::InvoiceTotals;
use crate::models::{
    AdminMember, Client, ClientCreated, ClientDraft, ClientStatus, Invoice, InvoiceAdjustment,
    InvoiceQuery, InvoiceStatus, NewInvoice, OrgType, Payment, PaymentDraft, Plan, PlanDraft,
    PlanLimits, PlanStatus, DEFAULT_CURRENCY,
};

/// Invoices generated when a client is created on a plan.
pub const SEEDED_INVOICE_MONTHS: u32 = 12;

const PLAN_COLUMNS: &str = "id, code, name, price_cents, currency, clinics_limit, users_limit, \
     doctors_limit, status, created_at";

const INVOICE_COLUMNS: &str = "i.id, i.org_id, i.number, i.status, i.currency, i.amount_cents, \
     i.subtotal_cents, i.discount_cents, i.fee_cents, i.due_at, i.issued_at, i.paid_at, i.created_at";

const CLIENT_QUERY: &str = "SELECT o.id, o.name, o.cpf_cnpj, o.phone, o.email, o.cep,
        o.address_line1, o.address_line2, o.district, o.city, o.state,
        o.plan_id, COALESCE(p.name, ''), o.type_id, COALESCE(t.key, ''), COALESCE(t.name, ''),
        o.status, EXISTS (SELECT 1 FROM appointments a WHERE a.org_id = o.id), o.created_at
     FROM organizations o
     LEFT JOIN plans p ON p.id = o.plan_id
     LEFT JOIN org_types t ON t.id = o.type_id";

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<Plan> {
    Ok(Plan {
        id: col_uuid(row, 0)?,
        code: row.get(1)?,
        name: row.get(2)?,
        price_cents: row.get(3)?,
        currency: row.get(4)?,
        limits: PlanLimits {
            clinics: row.get(5)?,
            users: row.get(6)?,
            doctors: row.get(7)?,
        },
        status: col_enum(row, 8)?,
        created_at: col_opt_ts(row, 9)?,
    })
}

fn client_from_row(row: &Row<'_>) -> rusqlite::Result<Client> {
    Ok(Client {
        id: col_uuid(row, 0)?,
        name: row.get(1)?,
        cpf_cnpj: row.get(2)?,
        phone: row.get(3)?,
        email: row.get(4)?,
        cep: row.get(5)?,
        address_line1: row.get(6)?,
        address_line2: row.get(7)?,
        district: row.get(8)?,
        city: row.get(9)?,
        state: row.get(10)?,
        plan_id: col_opt_uuid(row, 11)?,
        plan_name: row.get(12)?,
        type_id: col_opt_uuid(row, 13)?,
        type_key: row.get(14)?,
        type_name: row.get(15)?,
        status: col_enum(row, 16)?,
        has_appointments: row.get(17)?,
        created_at: col_opt_ts(row, 18)?,
    })
}

/// Open invoices past their due date read as overdue.
fn invoice_from_row(row: &Row<'_>) -> rusqlite::Result<Invoice> {
    let mut invoice = Invoice {
        id: col_uuid(row, 0)?,
        org_id: col_uuid(row, 1)?,
        number: row.get(2)?,
        status: col_enum(row, 3)?,
        currency: row.get(4)?,
        amount_cents: row.get(5)?,
        subtotal_cents: row.get(6)?,
        discount_cents: row.get(7)?,
        fee_cents: row.get(8)?,
        due_at: col_opt_ts(row, 9)?,
        issued_at: col_ts(row, 10)?,
        paid_at: col_opt_ts(row, 11)?,
        created_at: col_ts(row, 12)?,
    };
    if invoice.status == InvoiceStatus::Open && invoice.due_at.is_some_and(|d| d < Utc::now()) {
        invoice.status = InvoiceStatus::Overdue;
    }
    Ok(invoice)
}

fn payment_from_row(row: &Row<'_>) -> rusqlite::Result<Payment> {
    Ok(Payment {
        id: col_uuid(row, 0)?,
        invoice_id: col_uuid(row, 1)?,
        amount_cents: row.get(2)?,
        method: col_enum(row, 3)?,
        reference: row.get(4)?,
        created_at: col_ts(row, 5)?,
    })
}

fn find_plan(conn: &Connection, id: Uuid) -> Result<Plan, GatewayError> {
    conn.query_row(
        &format!("SELECT {PLAN_COLUMNS} FROM plans WHERE id = ?1"),
        [id.to_string()],
        plan_from_row,
    )
    .optional()?
    .ok_or(GatewayError::NotFound { entity: "plan" })
}

fn find_client(conn: &Connection, id: Uuid) -> Result<Client, GatewayError> {
    conn.query_row(&format!("{CLIENT_QUERY} WHERE o.id = ?1"), [id.to_string()], client_from_row)
        .optional()?
        .ok_or(GatewayError::NotFound { entity: "client" })
}

fn find_invoice(conn: &Connection, id: Uuid) -> Result<Invoice, GatewayError> {
    conn.query_row(
        &format!("SELECT {INVOICE_COLUMNS} FROM invoices i WHERE i.id = ?1"),
        [id.to_string()],
        invoice_from_row,
    )
    .optional()?
    .ok_or(GatewayError::NotFound { entity: "invoice" })
}

/// Status as persisted, before the overdue derivation.
fn stored_status(conn: &Connection, id: Uuid) -> Result<InvoiceStatus, GatewayError> {
    let raw: String = conn
        .query_row("SELECT status FROM invoices WHERE id = ?1", [id.to_string()], |row| row.get(0))
        .optional()?
        .ok_or(GatewayError::NotFound { entity: "invoice" })?;
    Ok(raw.parse()?)
}

fn check_components(discount_cents: i64, fee_cents: i64) -> Result<(), GatewayError> {
    if discount_cents < 0 || fee_cents < 0 {
        return Err(GatewayError::Rejected("Discount and fee cannot be negative".into()));
    }
    Ok(())
}

fn invoice_amount(subtotal_cents: i64, discount_cents: i64, fee_cents: i64) -> Result<i64, GatewayError> {
    let totals = InvoiceTotals::checked(subtotal_cents, discount_cents, fee_cents)
        .ok_or_else(|| GatewayError::Rejected("Invoice amount is out of range".into()))?;
    if totals.total_cents < 0 {
        return Err(GatewayError::Rejected("Discount exceeds the invoice total".into()));
    }
    Ok(totals.total_cents)
}

/// Next `YYYY-NNNNNN` number for the year.
fn next_invoice_number(conn: &Connection, year: i32) -> Result<String, GatewayError> {
    let last: Option<i64> = conn.query_row(
        "SELECT MAX(CAST(substr(number, 6) AS INTEGER)) FROM invoices WHERE number LIKE ?1",
        [format!("{year}-%")],
        |row| row.get(0),
    )?;
    Ok(format!("{year}-{:06}", last.unwrap_or(0) + 1))
}

fn plan_code_taken(conn: &Connection, code: &str, except: Option<Uuid>) -> Result<bool, GatewayError> {
    let owner: Option<String> = conn
        .query_row("SELECT id FROM plans WHERE code = ?1", [code], |row| row.get(0))
        .optional()?;
    Ok(owner.is_some_and(|o| Some(o) != except.map(|e| e.to_string())))
}

fn check_plan_draft(draft: &PlanDraft) -> Result<(), GatewayError> {
    let errors = draft.validate();
    if errors.is_empty() {
        Ok(())
    } else {
        Err(GatewayError::Rejected(errors.to_string()))
    }
}

fn set_client_status(conn: &Connection, id: Uuid, status: ClientStatus) -> Result<(), GatewayError> {
    conn.execute(
        "UPDATE organizations SET status = ?1 WHERE id = ?2",
        params![status.as_str(), id.to_string()],
    )?;
    tracing::info!(org_id = %id, status = %status, "client status changed");
    Ok(())
}

/// Sum payments and flip the invoice between open and paid.
fn settle(conn: &Connection, invoice_id: Uuid) -> Result<(), GatewayError> {
    let (amount, status): (i64, String) = conn.query_row(
        "SELECT amount_cents, status FROM invoices WHERE id = ?1",
        [invoice_id.to_string()],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let paid: i64 = conn.query_row(
        "SELECT COALESCE(SUM(amount_cents), 0) FROM payments WHERE invoice_id = ?1",
        [invoice_id.to_string()],
        |row| row.get(0),
    )?;
    let status: InvoiceStatus = status.parse()?;
    if amount > 0 && paid >= amount {
        if status != InvoiceStatus::Paid {
            conn.execute(
                "UPDATE invoices SET status = 'paid', paid_at = ?1 WHERE id = ?2",
                params![ts(Utc::now()), invoice_id.to_string()],
            )?;
            tracing::info!(invoice_id = %invoice_id, "invoice paid");
        }
    } else if status == InvoiceStatus::Paid {
        conn.execute(
            "UPDATE invoices SET status = 'open', paid_at = NULL WHERE id = ?1",
            [invoice_id.to_string()],
        )?;
        tracing::info!(invoice_id = %invoice_id, "invoice reopened");
    }
    Ok(())
}

impl BillingGateway for LocalGateway {
    fn list_plans(&self) -> Result<Vec<Plan>, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {PLAN_COLUMNS} FROM plans ORDER BY price_cents, name"
        ))?;
        let rows = stmt.query_map([], plan_from_row)?;
        collect(rows)
    }

    fn create_plan(&self, draft: &PlanDraft) -> Result<Plan, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        check_plan_draft(draft)?;
        let code = draft.code.trim();
        if plan_code_taken(&conn, code, None)? {
            return Err(GatewayError::Rejected(format!("Plan code \"{code}\" already exists")));
        }
        let id = draft.id.unwrap_or_else(Uuid::new_v4);
        conn.execute(
            "INSERT INTO plans (id, code, name, price_cents, currency, clinics_limit, users_limit,
                                doctors_limit, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.to_string(),
                code,
                draft.name.trim(),
                draft.price_cents,
                DEFAULT_CURRENCY,
                draft.limits.clinics,
                draft.limits.users,
                draft.limits.doctors,
                PlanStatus::Active.as_str(),
                ts(Utc::now())
            ],
        )?;
        tracing::info!(plan_id = %id, code, "plan created");
        find_plan(&conn, id)
    }

    fn update_plan(&self, id: Uuid, draft: &PlanDraft) -> Result<Plan, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        check_plan_draft(draft)?;
        let code = draft.code.trim();
        if plan_code_taken(&conn, code, Some(id))? {
            return Err(GatewayError::Rejected(format!("Plan code \"{code}\" already exists")));
        }
        let changed = conn.execute(
            "UPDATE plans SET code = ?1, name = ?2, price_cents = ?3,
                clinics_limit = ?4, users_limit = ?5, doctors_limit = ?6
             WHERE id = ?7",
            params![
                code,
                draft.name.trim(),
                draft.price_cents,
                draft.limits.clinics,
                draft.limits.users,
                draft.limits.doctors,
                id.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(GatewayError::NotFound { entity: "plan" });
        }
        find_plan(&conn, id)
    }

    fn set_plan_status(&self, id: Uuid, status: PlanStatus) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        let changed = conn.execute(
            "UPDATE plans SET status = ?1 WHERE id = ?2",
            params![status.as_str(), id.to_string()],
        )?;
        if changed == 0 {
            return Err(GatewayError::NotFound { entity: "plan" });
        }
        Ok(())
    }

    fn delete_plan(&self, id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        let users: i64 = conn.query_row(
            "SELECT COUNT(*) FROM organizations WHERE plan_id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )?;
        if users > 0 {
            return Err(GatewayError::Rejected(
                "Plan is in use by clients and cannot be deleted".into(),
            ));
        }
        let removed = conn.execute("DELETE FROM plans WHERE id = ?1", [id.to_string()])?;
        if removed == 0 {
            return Err(GatewayError::NotFound { entity: "plan" });
        }
        tracing::info!(plan_id = %id, "plan deleted");
        Ok(())
    }

    fn list_org_types(&self) -> Result<Vec<OrgType>, GatewayError> {
        let conn = self.conn();
        self.actor(&conn)?;
        let mut stmt = conn.prepare("SELECT id, key, name, status FROM org_types ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok(OrgType {
                id: col_uuid(row, 0)?,
                key: row.get(1)?,
                name: row.get(2)?,
                status: row.get(3)?,
            })
        })?;
        collect(rows)
    }

    fn list_clients(&self, query: Option<&str>) -> Result<Vec<Client>, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        let mut stmt = conn.prepare(&format!("{CLIENT_QUERY} ORDER BY o.name COLLATE NOCASE"))?;
        let rows = stmt.query_map([], client_from_row)?;
        let mut clients = collect(rows)?;
        if let Some(q) = query {
            clients.retain(|c| c.matches(q));
        }
        Ok(clients)
    }

    /// An existing account for the admin e-mail joins directly; otherwise
    /// an invite is issued when requested.
    fn create_client(
        &self,
        draft: &ClientDraft,
        admin: AdminMember,
    ) -> Result<ClientCreated, GatewayError> {
        let conn = self.conn();
        let actor = self.require_staff(&conn)?;
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(GatewayError::Rejected("Client name is required".into()));
        }
        if let Some(plan_id) = draft.plan_id {
            find_plan(&conn, plan_id)?;
        }

        let org_id = Uuid::new_v4();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO organizations (id, name, cpf_cnpj, phone, email, cep, address_line1,
                address_line2, district, city, state, plan_id, type_id, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, 'active', ?14)",
            params![
                org_id.to_string(),
                name,
                draft.cpf_cnpj.trim(),
                draft.phone.trim(),
                draft.email.trim(),
                draft.cep.trim(),
                draft.address_line1.trim(),
                draft.address_line2.trim(),
                draft.district.trim(),
                draft.city.trim(),
                draft.state.trim(),
                draft.plan_id.map(|p| p.to_string()),
                draft.type_id.map(|t| t.to_string()),
                ts(Utc::now())
            ],
        )?;

        let email = draft.email.trim();
        let mut invite_token = None;
        if !email.is_empty() {
            let existing = tx
                .query_row("SELECT id FROM users WHERE email = ?1", [email], |row| col_uuid(row, 0))
                .optional()?;
            match existing {
                Some(user_id) => insert_member(&tx, org_id, user_id, admin.effective_role())?,
                None if admin.invite => {
                    invite_token = Some(insert_invite(
                        &tx,
                        org_id,
                        email,
                        admin.effective_role(),
                        chrono::Duration::days(DEFAULT_INVITE_TTL_DAYS),
                    )?);
                }
                None => {}
            }
        }
        tx.commit()?;
        tracing::info!(org_id = %org_id, by = %actor.user_id, "client created");
        Ok(ClientCreated { org_id, invite_token })
    }

    fn update_client(
        &self,
        id: Uuid,
        draft: &ClientDraft,
        status: ClientStatus,
    ) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        let name = draft.name.trim();
        if name.is_empty() {
            return Err(GatewayError::Rejected("Client name is required".into()));
        }
        if let Some(plan_id) = draft.plan_id {
            find_plan(&conn, plan_id)?;
        }
        let changed = conn.execute(
            "UPDATE organizations SET name = ?1, cpf_cnpj = ?2, phone = ?3, email = ?4, cep = ?5,
                address_line1 = ?6, address_line2 = ?7, district = ?8, city = ?9, state = ?10,
                plan_id = ?11, type_id = ?12, status = ?13
             WHERE id = ?14",
            params![
                name,
                draft.cpf_cnpj.trim(),
                draft.phone.trim(),
                draft.email.trim(),
                draft.cep.trim(),
                draft.address_line1.trim(),
                draft.address_line2.trim(),
                draft.district.trim(),
                draft.city.trim(),
                draft.state.trim(),
                draft.plan_id.map(|p| p.to_string()),
                draft.type_id.map(|t| t.to_string()),
                status.as_str(),
                id.to_string()
            ],
        )?;
        if changed == 0 {
            return Err(GatewayError::NotFound { entity: "client" });
        }
        Ok(())
    }

    fn toggle_client(&self, id: Uuid) -> Result<ClientStatus, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        let next = match find_client(&conn, id)?.status {
            ClientStatus::Blocked => {
                return Err(GatewayError::Rejected("Unblock the client first".into()))
            }
            ClientStatus::Active => ClientStatus::Inactive,
            ClientStatus::Inactive => ClientStatus::Active,
        };
        set_client_status(&conn, id, next)?;
        Ok(next)
    }

    fn set_client_blocked(&self, id: Uuid, blocked: bool) -> Result<ClientStatus, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        find_client(&conn, id)?;
        let next = if blocked { ClientStatus::Blocked } else { ClientStatus::Active };
        set_client_status(&conn, id, next)?;
        Ok(next)
    }

    fn delete_client(&self, id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        if find_client(&conn, id)?.has_appointments {
            return Err(GatewayError::Rejected(
                "Client has appointments and cannot be deleted".into(),
            ));
        }
        conn.execute("DELETE FROM organizations WHERE id = ?1", [id.to_string()])?;
        tracing::info!(org_id = %id, "client deleted");
        Ok(())
    }

    fn seed_plan_invoices(
        &self,
        org_id: Uuid,
        plan_id: Uuid,
        start: DateTime<Utc>,
    ) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        find_client(&conn, org_id)?;
        let plan = find_plan(&conn, plan_id)?;
        let now = Utc::now();

        let tx = conn.unchecked_transaction()?;
        for month in 0..SEEDED_INVOICE_MONTHS {
            let due = start.checked_add_months(Months::new(month)).ok_or_else(|| {
                GatewayError::Rejected("Invoice due date out of range".into())
            })?;
            let number = next_invoice_number(&tx, now.year())?;
            tx.execute(
                "INSERT INTO invoices (id, org_id, plan_id, number, status, currency, amount_cents,
                    subtotal_cents, discount_cents, fee_cents, due_at, issued_at, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'open', ?5, ?6, ?6, 0, 0, ?7, ?8, ?8)",
                params![
                    Uuid::new_v4().to_string(),
                    org_id.to_string(),
                    plan_id.to_string(),
                    number,
                    plan.currency,
                    plan.price_cents,
                    ts(due),
                    ts(now)
                ],
            )?;
        }
        tx.commit()?;
        tracing::info!(org_id = %org_id, plan_id = %plan_id, "plan invoices seeded");
        Ok(())
    }

    fn list_invoices(&self, query: &InvoiceQuery) -> Result<Vec<Invoice>, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {INVOICE_COLUMNS}, o.name FROM invoices i
             JOIN organizations o ON o.id = i.org_id
             WHERE (?1 IS NULL OR i.org_id = ?1)
             ORDER BY i.created_at DESC, i.number DESC"
        ))?;
        let rows = stmt.query_map([query.org_id.map(|o| o.to_string())], |row| {
            Ok((invoice_from_row(row)?, row.get::<_, String>(13)?))
        })?;
        let q = query
            .q
            .as_deref()
            .map(|q| q.trim().to_lowercase())
            .filter(|q| !q.is_empty());
        let invoices = collect(rows)?
            .into_iter()
            .filter(|(inv, org_name)| {
                q.as_ref().map_or(true, |q| {
                    org_name.to_lowercase().contains(q)
                        || inv.number.as_deref().is_some_and(|n| n.to_lowercase().contains(q))
                })
            })
            .filter(|(inv, _)| query.status.map_or(true, |s| inv.status == s))
            .map(|(inv, _)| inv)
            .collect();
        Ok(invoices)
    }

    fn create_invoice_from_plan(&self, new: &NewInvoice) -> Result<Invoice, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        check_components(new.discount_cents, new.fee_cents)?;
        find_client(&conn, new.org_id)?;
        let plan = find_plan(&conn, new.plan_id)?;
        let amount = invoice_amount(plan.price_cents, new.discount_cents, new.fee_cents)?;
        let id = Uuid::new_v4();
        let now = ts(Utc::now());
        conn.execute(
            "INSERT INTO invoices (id, org_id, plan_id, status, currency, amount_cents,
                subtotal_cents, discount_cents, fee_cents, due_at, issued_at, created_at)
             VALUES (?1, ?2, ?3, 'draft', ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            params![
                id.to_string(),
                new.org_id.to_string(),
                plan.id.to_string(),
                plan.currency,
                amount,
                plan.price_cents,
                new.discount_cents,
                new.fee_cents,
                new.due_at.map(ts),
                now
            ],
        )?;
        tracing::info!(invoice_id = %id, org_id = %new.org_id, "draft invoice created");
        find_invoice(&conn, id)
    }

    fn open_invoice(&self, id: Uuid) -> Result<Invoice, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        if stored_status(&conn, id)? != InvoiceStatus::Draft {
            return Err(GatewayError::Rejected("Only draft invoices can be opened".into()));
        }
        let now = Utc::now();
        let number = next_invoice_number(&conn, now.year())?;
        conn.execute(
            "UPDATE invoices SET status = 'open', number = ?1, issued_at = ?2 WHERE id = ?3",
            params![number, ts(now), id.to_string()],
        )?;
        tracing::info!(invoice_id = %id, number = %number, "invoice opened");
        find_invoice(&conn, id)
    }

    fn adjust_invoice(&self, id: Uuid, adjustment: &InvoiceAdjustment) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        check_components(adjustment.discount_cents, adjustment.fee_cents)?;
        if stored_status(&conn, id)? != InvoiceStatus::Open {
            return Err(GatewayError::Rejected("Only open invoices can be adjusted".into()));
        }
        let subtotal: i64 = conn.query_row(
            "SELECT subtotal_cents FROM invoices WHERE id = ?1",
            [id.to_string()],
            |row| row.get(0),
        )?;
        let amount = invoice_amount(subtotal, adjustment.discount_cents, adjustment.fee_cents)?;
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "UPDATE invoices SET discount_cents = ?1, fee_cents = ?2, amount_cents = ?3,
                due_at = COALESCE(?4, due_at)
             WHERE id = ?5",
            params![
                adjustment.discount_cents,
                adjustment.fee_cents,
                amount,
                adjustment.due_at.map(ts),
                id.to_string()
            ],
        )?;
        settle(&tx, id)?;
        tx.commit()?;
        Ok(())
    }

    fn create_payment(&self, invoice_id: Uuid, payment: &PaymentDraft) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        match stored_status(&conn, invoice_id)? {
            InvoiceStatus::Draft => {
                return Err(GatewayError::Rejected(
                    "Open the invoice before registering payments".into(),
                ))
            }
            InvoiceStatus::Canceled => {
                return Err(GatewayError::Rejected("Invoice is canceled".into()))
            }
            _ => {}
        }
        if payment.amount_cents == 0 {
            return Err(GatewayError::Rejected("Payment amount cannot be zero".into()));
        }
        let reference = payment
            .reference
            .as_deref()
            .map(str::trim)
            .filter(|r| !r.is_empty());
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "INSERT INTO payments (id, invoice_id, amount_cents, method, reference, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                Uuid::new_v4().to_string(),
                invoice_id.to_string(),
                payment.amount_cents,
                payment.method.as_str(),
                reference,
                ts(Utc::now())
            ],
        )?;
        settle(&tx, invoice_id)?;
        tx.commit()?;
        tracing::info!(invoice_id = %invoice_id, amount_cents = payment.amount_cents, "payment registered");
        Ok(())
    }

    fn list_payments(&self, invoice_id: Uuid) -> Result<Vec<Payment>, GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        let mut stmt = conn.prepare(
            "SELECT id, invoice_id, amount_cents, method, reference, created_at FROM payments
             WHERE invoice_id = ?1 ORDER BY created_at, rowid",
        )?;
        let rows = stmt.query_map([invoice_id.to_string()], payment_from_row)?;
        collect(rows)
    }

    fn delete_invoice(&self, id: Uuid) -> Result<(), GatewayError> {
        let conn = self.conn();
        self.require_staff(&conn)?;
        if !stored_status(&conn, id)?.is_deletable() {
            return Err(GatewayError::Rejected(
                "Only draft or open invoices can be deleted".into(),
            ));
        }
        conn.execute("DELETE FROM invoices WHERE id = ?1", [id.to_string()])?;
        tracing::info!(invoice_id = %id, "invoice deleted");
        Ok(())
    }
}
