use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use crate::handlers;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        version = "1.0.0",
        description = r#"
# Storefront Checkout API

Cart, checkout and order lifecycle for a retail storefront.

## Checkout flow

1. Fill the cart (`/cart/items`)
2. Select a delivery address (`/checkout/address`)
3. Select a delivery method (`/checkout/shipping`)
4. Submit payment (`/checkout/payment`). Wallet and card payments return a `payment_url`.

Steps cannot be skipped. Conflicts carry `current_state` so clients can resynchronise.

## Authentication

Include a bearer token in the Authorization header:

```
Authorization: Bearer <your-jwt-token>
```

Administrator endpoints require the `admin` role.
        "#,
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "http://localhost:8080", description = "Local development")
    ),
    tags(
        (name = "Cart", description = "Shopping cart"),
        (name = "Checkout", description = "Checkout session steps"),
        (name = "Orders", description = "Customer order endpoints"),
        (name = "Admin", description = "Administrative endpoints"),
        (name = "Payments", description = "Payment processor callbacks"),
        (name = "Stores", description = "Pickup stores"),
        (name = "Health", description = "Health check endpoints")
    ),
    paths(
        // Cart
        handlers::cart::view_cart,
        handlers::cart::add_item,
        handlers::cart::set_quantity,
        handlers::cart::remove_item,
        handlers::cart::clear_cart,
        // Checkout
        handlers::checkout::details,
        handlers::checkout::set_address,
        handlers::checkout::set_shipping,
        handlers::checkout::calculate_shipping,
        handlers::checkout::set_payment,
        handlers::checkout::abandon,
        // Orders
        handlers::orders::list_orders,
        handlers::orders::get_order,
        handlers::orders::cancel_order,
        handlers::orders::retry_payment,
        // Admin
        handlers::admin::update_status,
        handlers::admin::list_orders,
        handlers::admin::get_order,
        handlers::admin::order_history,
        handlers::admin::stats,
        handlers::admin::set_stock,
        // Payments
        handlers::payments::payment_callback,
        // Stores & health
        handlers::stores::list_stores,
        handlers::health::health,
    ),
    components(
        schemas(
            crate::errors::ErrorResponse,
            crate::entities::CheckoutState,
            crate::entities::DeliveryMethod,
            crate::entities::PaymentMethod,
            crate::entities::PaymentStatus,
            crate::entities::ShippingStatus,
            crate::services::PaymentResult,
        )
    ),
    modifiers(&BearerAuth)
)]
pub struct ApiDocV1;

struct BearerAuth;

impl Modify for BearerAuth {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme(
            "Bearer",
            SecurityScheme::Http(
                HttpBuilder::new()
                    .scheme(HttpAuthScheme::Bearer)
                    .bearer_format("JWT")
                    .build(),
            ),
        );
    }
}

pub fn swagger_ui() -> SwaggerUi {
    SwaggerUi::new("/swagger-ui")
        .url("/api-docs/openapi.json", ApiDocV1::openapi())
        .config(utoipa_swagger_ui::Config::from("/api-docs/openapi.json").try_it_out_enabled(true))
}
