use crate::holidays::{HolidayOrigin, HolidaysResponse};
use crate::models::{
    Order, OrderDetail, OrderHistory, OrderItem, OrderStatus, OrderView, PublicOrder, RecentItem, SavedAddress,
    SavedDestination, Supplier, UserProfile,
};
use crate::orders::{CreateOrderRequest, ItemInput, UpdateOrderRequest};
use crate::routes::{account, orders, public, saved, MessageResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::account::signup,
        crate::routes::account::login,
        crate::routes::account::me,
        crate::routes::orders::list_orders,
        crate::routes::orders::create_order,
        crate::routes::orders::get_order,
        crate::routes::orders::update_order,
        crate::routes::orders::delete_order,
        crate::routes::saved::list_addresses,
        crate::routes::saved::create_address,
        crate::routes::saved::get_address,
        crate::routes::saved::update_address,
        crate::routes::saved::delete_address,
        crate::routes::saved::list_destinations,
        crate::routes::saved::create_destination,
        crate::routes::saved::get_destination,
        crate::routes::saved::update_destination,
        crate::routes::saved::delete_destination,
        crate::routes::saved::list_recent_items,
        crate::routes::holidays::get_holidays,
        crate::routes::public::get_public_order,
        crate::routes::public::verify,
        crate::routes::public::respond,
    ),
    components(schemas(
        OrderStatus, Order, OrderItem, OrderHistory, OrderView, OrderDetail, PublicOrder, Supplier, UserProfile,
        SavedAddress, SavedDestination, RecentItem, HolidaysResponse, HolidayOrigin, MessageResponse,
        CreateOrderRequest, UpdateOrderRequest, ItemInput,
        account::SignupRequest, account::SignupResponse, account::LoginRequest, account::LoginResponse,
        orders::OrderListResponse, orders::OrderResponse, orders::OrderSavedResponse, orders::Pagination,
        saved::AddressRequest, saved::AddressResponse, saved::AddressList,
        saved::DestinationRequest, saved::DestinationResponse, saved::DestinationList, saved::RecentItemList,
        public::PublicOrderResponse, public::VerifyRequest, public::RespondRequest, public::ActionResponse,
    )),
    tags(
        (name = "auth", description = "Accounts and sessions"),
        (name = "orders", description = "Supplier order management"),
        (name = "saved", description = "Saved addresses, destinations and recent items"),
        (name = "public", description = "Recipient access through the order link"),
        (name = "holidays", description = "Public holiday calendar"),
    )
)]
pub struct ApiDoc;
